use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{AppResult, ServerError};

fn default_true() -> bool {
    true
}

fn default_backlog() -> i32 {
    10000
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_prefix() -> String {
    "flotilla.log".to_string()
}

/// Declarative settings for one listening endpoint. Immutable once loaded;
/// every field is checked by [`EndpointConfig::validate`] before any socket
/// or thread pool is allocated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Logical server name, unique across the fleet. Handlers are matched
    /// against this name.
    pub name: String,
    pub port: u16,
    /// Acceptor pool size. 0 means sized from the CPU count.
    #[serde(default)]
    pub boss_count: i32,
    /// Worker pool size. 0 means sized from the CPU count.
    #[serde(default)]
    pub worker_count: i32,
    /// Seconds without a read before the connection is reclaimed. 0 disables.
    #[serde(default)]
    pub reader_idle_time_seconds: i64,
    /// Seconds without a write before a writer-idle event fires. 0 disables.
    #[serde(default)]
    pub writer_idle_time_seconds: i64,
    /// Seconds without any activity before an all-idle event fires. 0 disables.
    #[serde(default)]
    pub all_idle_time_seconds: i64,
    /// Name of the business handler that must resolve from the registry.
    pub handler_name: String,
    #[serde(default = "default_true")]
    pub keep_alive: bool,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    #[serde(default = "default_true")]
    pub tcp_no_delay: bool,
    #[serde(default)]
    pub decoder_name: Option<String>,
    #[serde(default)]
    pub encoder_name: Option<String>,
    /// Prefer the platform's native edge-triggered reactor when available.
    /// Falls back to the portable reactor at runtime, never a hard error.
    #[serde(default = "default_true")]
    pub use_native_transport: bool,
}

impl EndpointConfig {
    /// Fail-fast validation with field-named errors, run before any
    /// resource allocation.
    pub fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() {
            return Err(ServerError::config("name", "value is blank"));
        }
        if self.port == 0 {
            return Err(ServerError::config("port", "value is not in range 1~65535"));
        }
        if self.boss_count < 0 {
            return Err(ServerError::config("boss_count", "value is < 0"));
        }
        if self.worker_count < 0 {
            return Err(ServerError::config("worker_count", "value is < 0"));
        }
        if self.reader_idle_time_seconds < 0 {
            return Err(ServerError::config("reader_idle_time_seconds", "value is < 0"));
        }
        if self.writer_idle_time_seconds < 0 {
            return Err(ServerError::config("writer_idle_time_seconds", "value is < 0"));
        }
        if self.all_idle_time_seconds < 0 {
            return Err(ServerError::config("all_idle_time_seconds", "value is < 0"));
        }
        if self.handler_name.trim().is_empty() {
            return Err(ServerError::config("handler_name", "value is blank"));
        }
        if self.backlog < 1 {
            return Err(ServerError::config("backlog", "value is < 1"));
        }
        Ok(())
    }

    /// Pool size with the 0 ⇒ CPU-count default applied.
    pub(crate) fn sized_pool(count: i32) -> usize {
        if count > 0 {
            count as usize
        } else {
            num_cpus::get()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default = "default_log_prefix")]
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            dir: default_log_dir(),
            file_prefix: default_log_prefix(),
        }
    }
}

/// The whole configuration set: N endpoints plus ambient logging settings.
/// Loaded once at process start, immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub log: LogConfig,
}

impl FleetConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<FleetConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or_else(|| {
                ServerError::config(
                    "config_file",
                    format!("invalid path: {}", path.as_ref().to_string_lossy()),
                )
            })?;
        let raw = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;
        let fleet: FleetConfig = raw.try_deserialize()?;
        Ok(fleet)
    }

    /// Validates every endpoint and the cross-endpoint uniqueness rule.
    /// One bad config aborts the whole startup; nothing is partially built.
    pub fn validate(&self) -> AppResult<()> {
        let mut names = HashSet::new();
        for endpoint in &self.endpoints {
            endpoint.validate()?;
            if !names.insert(endpoint.name.as_str()) {
                return Err(ServerError::config(
                    "name",
                    format!("duplicate server name `{}`", endpoint.name),
                ));
            }
        }
        Ok(())
    }
}
