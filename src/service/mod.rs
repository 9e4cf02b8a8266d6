pub use app_error::{AppResult, ServerError};
pub use config::{EndpointConfig, FleetConfig, LogConfig};
pub use lifecycle::ProcessLifecycle;
pub use orchestrator::{ReadinessReport, ServerOrchestrator};
pub use runtime::{ServerRuntime, ServerState, Transport};
pub use shutdown::ShutdownSignal;
pub use tracing_config::{setup_local_tracing, setup_tracing};

mod app_error;
mod config;
mod lifecycle;
mod orchestrator;
mod runtime;
mod shutdown;
mod tracing_config;
