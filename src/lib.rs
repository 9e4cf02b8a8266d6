mod network;
mod pipeline;
mod service;

pub use network::IdlePolicy;
pub use pipeline::{
    BoxedDecoder, BoxedEncoder, ConnectionContext, DecoderFactory, DescriptorPool, EchoHandler,
    EncoderFactory, FrozenRegistry, HandlerDescriptor, HandlerFactory, HandlerRegistry, IdleEvent,
    LineDecoder, LineEncoder, PipelineBuilder, PipelineSpec, ServerHandler,
};
pub use service::{
    setup_local_tracing, setup_tracing, AppResult, EndpointConfig, FleetConfig, LogConfig,
    ProcessLifecycle, ReadinessReport, ServerError, ServerOrchestrator, ServerRuntime, ServerState,
    ShutdownSignal, Transport,
};
