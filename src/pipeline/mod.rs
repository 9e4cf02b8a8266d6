//! Handler pipeline: registry of named handler components, chain
//! resolution/ordering, and the traits plugged handlers implement.
//!
//! A registry is populated once by the discovery collaborator and frozen.
//! At orchestrator startup the builder resolves each endpoint's chain from
//! a consumable descriptor pool, producing an immutable [`PipelineSpec`]
//! that is instantiated into a live chain per accepted connection.

pub use builder::{PipelineBuilder, PipelineSpec};
pub use codec::{BoxedDecoder, BoxedEncoder, LineDecoder, LineEncoder};
pub use handler::{ConnectionContext, EchoHandler, IdleEvent, ServerHandler};
pub use registry::{
    DecoderFactory, DescriptorPool, EncoderFactory, FrozenRegistry, HandlerDescriptor,
    HandlerFactory, HandlerRegistry,
};

pub(crate) use builder::LiveChain;

mod builder;
mod codec;
mod handler;
mod registry;
