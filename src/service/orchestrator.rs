use tracing::{error, info};

use crate::pipeline::{FrozenRegistry, PipelineBuilder};

use super::config::FleetConfig;
use super::runtime::{ServerRuntime, ServerState, Transport};
use super::AppResult;

/// Startup report for one successfully started server.
#[derive(Debug, Clone)]
pub struct ReadinessReport {
    pub name: String,
    pub port: u16,
    pub transport: Transport,
    pub chain: Vec<String>,
}

/// Builds, starts and stops one [`ServerRuntime`] per endpoint config.
///
/// All configs are validated and all pipelines resolved before any socket
/// is bound, so a bad config or a missing handler can never leave a
/// partially-started fleet. Bind failures follow the fail-together policy:
/// any one aborts startup and stops whatever already started.
pub struct ServerOrchestrator {
    runtimes: Vec<ServerRuntime>,
}

impl ServerOrchestrator {
    /// Validates the whole config set and resolves every endpoint's
    /// pipeline. Fails before any bind on the first violation.
    pub fn new(fleet: &FleetConfig, registry: &FrozenRegistry) -> AppResult<ServerOrchestrator> {
        fleet.validate()?;

        let mut pool = registry.descriptor_pool();
        let mut runtimes = Vec::with_capacity(fleet.endpoints.len());
        for config in &fleet.endpoints {
            let spec = PipelineBuilder::build(config, &mut pool, registry)?;
            runtimes.push(ServerRuntime::new(config.clone(), spec));
        }
        Ok(ServerOrchestrator { runtimes })
    }

    /// Starts every runtime in configured order. On any failure the
    /// already-started runtimes are shut down and the error is returned;
    /// afterwards every runtime reports `Stopped`.
    pub fn start(&mut self) -> AppResult<Vec<ReadinessReport>> {
        for i in 0..self.runtimes.len() {
            if let Err(err) = self.runtimes[i].start() {
                error!(
                    server = %self.runtimes[i].name(),
                    error = %err,
                    "startup failed, stopping already-started servers"
                );
                self.shutdown();
                return Err(err);
            }
        }
        let report = self.readiness();
        for ready in &report {
            info!(
                server = %ready.name,
                port = ready.port,
                transport = %ready.transport,
                chain = ?ready.chain,
                "server ready"
            );
        }
        Ok(report)
    }

    pub fn readiness(&self) -> Vec<ReadinessReport> {
        self.runtimes
            .iter()
            .map(|rt| ReadinessReport {
                name: rt.name().to_string(),
                port: rt.port(),
                transport: rt.transport(),
                chain: rt.chain_summary(),
            })
            .collect()
    }

    pub fn states(&self) -> Vec<(String, ServerState)> {
        self.runtimes
            .iter()
            .map(|rt| (rt.name().to_string(), rt.state()))
            .collect()
    }

    /// Ordered shutdown of all runtimes. Idempotent; per-runtime teardown
    /// failures are logged and never re-raised.
    pub fn shutdown(&mut self) {
        for runtime in &mut self.runtimes {
            if let Err(err) = runtime.shutdown() {
                error!(server = %runtime.name(), error = %err, "shutdown error, continuing");
            }
        }
        info!("orchestrator shutdown complete");
    }
}
