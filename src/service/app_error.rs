pub type AppResult<T> = Result<T, ServerError>;

/// Error taxonomy for the framework.
///
/// Startup-time errors (`Config`, `HandlerResolution`, `Bind`) abort before
/// any resource is leaked; `RuntimeIo` stays isolated to one connection and
/// `Shutdown` is logged best-effort during teardown, never re-raised past
/// the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid config field `{field}`: {message}")]
    Config { field: String, message: String },

    #[error("handler `{name}` not found in registry for server `{server}`")]
    HandlerResolution { server: String, name: String },

    #[error("server `{server}` failed to bind port {port}: {source}")]
    Bind {
        server: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("connection I/O error: {0}")]
    RuntimeIo(String),

    #[error("shutdown error: {0}")]
    Shutdown(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file error: {0}")]
    ConfigFile(#[from] config::ConfigError),
}

impl ServerError {
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        ServerError::Config {
            field: field.into(),
            message: message.into(),
        }
    }
}
