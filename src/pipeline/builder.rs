use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::network::IdlePolicy;
use crate::service::{AppResult, EndpointConfig, ServerError};

use super::codec::{BoxedDecoder, BoxedEncoder};
use super::handler::{ConnectionContext, IdleEvent, ServerHandler};
use super::registry::{
    DecoderFactory, DescriptorPool, EncoderFactory, FrozenRegistry, HandlerFactory,
};

/// How a chain stage comes to life for a connection.
enum Instancing {
    /// One instance, built at pipeline-build time, reused by every
    /// connection of the server.
    Shared(Arc<Mutex<Box<dyn ServerHandler>>>),
    /// Fresh instance per accepted connection.
    PerConnection(HandlerFactory),
}

struct StageSpec {
    name: String,
    instancing: Instancing,
}

/// Immutable chain blueprint for one endpoint, computed once at orchestrator
/// startup. Chain shape: `[idle-monitor] → [decoder?] → [encoder?] →
/// [business handlers in resolved order]`.
pub struct PipelineSpec {
    server_name: String,
    idle: IdlePolicy,
    decoder: Option<(String, DecoderFactory)>,
    encoder: Option<(String, EncoderFactory)>,
    stages: Vec<StageSpec>,
}

impl std::fmt::Debug for PipelineSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineSpec")
            .field("server_name", &self.server_name)
            .field("idle", &self.idle)
            .field("decoder", &self.decoder.as_ref().map(|(name, _)| name))
            .field("encoder", &self.encoder.as_ref().map(|(name, _)| name))
            .field("stages", &self.stages.iter().map(|s| &s.name).collect::<Vec<_>>())
            .finish()
    }
}

impl PipelineSpec {
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn idle_policy(&self) -> IdlePolicy {
        self.idle
    }

    /// Stage names in chain order, for the readiness report.
    pub fn summary(&self) -> Vec<String> {
        let mut names = vec!["idle-monitor".to_string()];
        if let Some((name, _)) = &self.decoder {
            names.push(name.clone());
        }
        if let Some((name, _)) = &self.encoder {
            names.push(name.clone());
        }
        names.extend(self.stages.iter().map(|s| s.name.clone()));
        names
    }

    /// Instantiates the live chain for one accepted connection, honoring
    /// the sharable/per-connection instancing rules.
    pub(crate) fn instantiate(&self) -> LiveChain {
        let handlers = self
            .stages
            .iter()
            .map(|stage| match &stage.instancing {
                Instancing::Shared(instance) => LiveHandler::Shared(instance.clone()),
                Instancing::PerConnection(factory) => LiveHandler::Owned(factory()),
            })
            .collect();
        LiveChain {
            handlers,
            decoder: self.decoder.as_ref().map(|(_, f)| f()),
            encoder: self.encoder.as_ref().map(|(_, f)| f()),
        }
    }
}

/// Resolves, orders and claims handlers for one endpoint.
pub struct PipelineBuilder;

impl PipelineBuilder {
    /// Builds the chain spec for `config`, consuming matched descriptors
    /// from `pool`. Fails with `HandlerResolution` before any bind when the
    /// configured business handler or a named codec is absent.
    pub fn build(
        config: &EndpointConfig,
        pool: &mut DescriptorPool,
        registry: &FrozenRegistry,
    ) -> AppResult<PipelineSpec> {
        let mut matched = pool.take_for_server(&config.name);
        // ascending order, registration sequence breaks ties; deterministic
        // for identical input
        matched.sort_by_key(|d| (d.order, d.seq));

        if !matched.iter().any(|d| d.name == config.handler_name) {
            return Err(ServerError::HandlerResolution {
                server: config.name.clone(),
                name: config.handler_name.clone(),
            });
        }

        let decoder = match &config.decoder_name {
            Some(name) => {
                let factory =
                    registry
                        .decoder(name)
                        .ok_or_else(|| ServerError::HandlerResolution {
                            server: config.name.clone(),
                            name: name.clone(),
                        })?;
                Some((name.clone(), factory.clone()))
            }
            None => None,
        };
        let encoder = match &config.encoder_name {
            Some(name) => {
                let factory =
                    registry
                        .encoder(name)
                        .ok_or_else(|| ServerError::HandlerResolution {
                            server: config.name.clone(),
                            name: name.clone(),
                        })?;
                Some((name.clone(), factory.clone()))
            }
            None => None,
        };

        let stages = matched
            .into_iter()
            .map(|descriptor| {
                let instancing = if descriptor.sharable {
                    Instancing::Shared(Arc::new(Mutex::new((descriptor.factory)())))
                } else {
                    Instancing::PerConnection(descriptor.factory.clone())
                };
                StageSpec {
                    name: descriptor.name,
                    instancing,
                }
            })
            .collect::<Vec<_>>();

        let spec = PipelineSpec {
            server_name: config.name.clone(),
            idle: IdlePolicy::from_config(config),
            decoder,
            encoder,
            stages,
        };
        debug!(
            server = %spec.server_name,
            chain = ?spec.summary(),
            "pipeline resolved"
        );
        Ok(spec)
    }
}

enum LiveHandler {
    Shared(Arc<Mutex<Box<dyn ServerHandler>>>),
    Owned(Box<dyn ServerHandler>),
}

impl LiveHandler {
    fn with<R>(&mut self, f: impl FnOnce(&mut dyn ServerHandler) -> R) -> R {
        match self {
            LiveHandler::Shared(instance) => f(instance.lock().as_mut()),
            LiveHandler::Owned(instance) => f(instance.as_mut()),
        }
    }
}

/// The handler chain attached to one live connection. Events are delivered
/// synchronously, in order, to every stage.
pub(crate) struct LiveChain {
    handlers: Vec<LiveHandler>,
    decoder: Option<BoxedDecoder>,
    encoder: Option<BoxedEncoder>,
}

impl LiveChain {
    pub(crate) fn decoder_mut(&mut self) -> Option<&mut BoxedDecoder> {
        self.decoder.as_mut()
    }

    pub(crate) fn encoder_mut(&mut self) -> Option<&mut BoxedEncoder> {
        self.encoder.as_mut()
    }

    pub(crate) fn on_active(&mut self, ctx: &mut ConnectionContext) {
        for handler in &mut self.handlers {
            handler.with(|h| h.on_active(ctx));
        }
    }

    pub(crate) fn on_read(&mut self, ctx: &mut ConnectionContext, msg: Bytes) -> AppResult<()> {
        for handler in &mut self.handlers {
            handler.with(|h| h.on_read(ctx, msg.clone()))?;
        }
        Ok(())
    }

    pub(crate) fn on_idle(&mut self, ctx: &mut ConnectionContext, event: IdleEvent) {
        for handler in &mut self.handlers {
            handler.with(|h| h.on_idle(ctx, event));
        }
    }

    pub(crate) fn on_inactive(&mut self, ctx: &mut ConnectionContext) {
        for handler in &mut self.handlers {
            handler.with(|h| h.on_inactive(ctx));
        }
    }

    pub(crate) fn on_error(&mut self, ctx: &mut ConnectionContext, err: &ServerError) {
        for handler in &mut self.handlers {
            handler.with(|h| h.on_error(ctx, err));
        }
    }
}
