use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::codec::{BoxedDecoder, BoxedEncoder};
use super::handler::ServerHandler;

pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn ServerHandler> + Send + Sync>;
pub type DecoderFactory = Arc<dyn Fn() -> BoxedDecoder + Send + Sync>;
pub type EncoderFactory = Arc<dyn Fn() -> BoxedEncoder + Send + Sync>;

/// One registered handler component: which server it serves, where it sits
/// in the chain, and how instances come to life.
#[derive(Clone)]
pub struct HandlerDescriptor {
    pub name: String,
    pub server_name: String,
    /// Chain position, lower = earlier. Ties resolve by registration order.
    pub order: i32,
    /// A sharable (stateless) handler is instantiated once and reused by
    /// every connection of its server; a non-sharable one is built fresh
    /// per accepted connection.
    pub sharable: bool,
    pub factory: HandlerFactory,
    pub(crate) seq: u64,
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("name", &self.name)
            .field("server_name", &self.server_name)
            .field("order", &self.order)
            .field("sharable", &self.sharable)
            .field("seq", &self.seq)
            .finish()
    }
}

/// Catalog of handler components and named codecs, populated once by the
/// discovery collaborator and then frozen. Freezing consumes the registry,
/// so late registration is impossible by construction.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<HandlerDescriptor>,
    decoders: HashMap<String, DecoderFactory>,
    encoders: HashMap<String, EncoderFactory>,
    next_seq: u64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(
        &mut self,
        name: impl Into<String>,
        server_name: impl Into<String>,
        order: i32,
        sharable: bool,
        factory: HandlerFactory,
    ) -> &mut Self {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.handlers.push(HandlerDescriptor {
            name: name.into(),
            server_name: server_name.into(),
            order,
            sharable,
            factory,
            seq,
        });
        self
    }

    pub fn register_decoder(
        &mut self,
        name: impl Into<String>,
        factory: DecoderFactory,
    ) -> &mut Self {
        self.decoders.insert(name.into(), factory);
        self
    }

    pub fn register_encoder(
        &mut self,
        name: impl Into<String>,
        factory: EncoderFactory,
    ) -> &mut Self {
        self.encoders.insert(name.into(), factory);
        self
    }

    pub fn freeze(self) -> FrozenRegistry {
        FrozenRegistry {
            handlers: Arc::new(self.handlers),
            decoders: Arc::new(self.decoders),
            encoders: Arc::new(self.encoders),
        }
    }
}

/// Read-only view of the registry used after startup begins.
#[derive(Clone)]
pub struct FrozenRegistry {
    handlers: Arc<Vec<HandlerDescriptor>>,
    decoders: Arc<HashMap<String, DecoderFactory>>,
    encoders: Arc<HashMap<String, EncoderFactory>>,
}

impl FrozenRegistry {
    /// A consumable pool of descriptors for one orchestrator startup.
    /// Pipelines across servers are disjoint: the builder removes what it
    /// resolves so no handler instance serves two servers.
    pub fn descriptor_pool(&self) -> DescriptorPool {
        DescriptorPool {
            descriptors: self.handlers.as_ref().clone(),
        }
    }

    pub fn decoder(&self, name: &str) -> Option<&DecoderFactory> {
        self.decoders.get(name)
    }

    pub fn encoder(&self, name: &str) -> Option<&EncoderFactory> {
        self.encoders.get(name)
    }
}

/// Descriptors not yet claimed by a server's pipeline.
#[derive(Debug)]
pub struct DescriptorPool {
    descriptors: Vec<HandlerDescriptor>,
}

impl DescriptorPool {
    /// Removes and returns every descriptor tagged for `server_name`,
    /// preserving registration order.
    pub fn take_for_server(&mut self, server_name: &str) -> Vec<HandlerDescriptor> {
        let mut taken = Vec::new();
        let mut remaining = Vec::with_capacity(self.descriptors.len());
        for descriptor in self.descriptors.drain(..) {
            if descriptor.server_name == server_name {
                taken.push(descriptor);
            } else {
                remaining.push(descriptor);
            }
        }
        self.descriptors = remaining;
        taken
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::pipeline::handler::{ConnectionContext, EchoHandler};
    use crate::service::AppResult;

    use super::*;

    fn echo_factory() -> HandlerFactory {
        Arc::new(|| Box::new(EchoHandler))
    }

    #[test]
    fn registration_order_is_recorded() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_handler("A", "s1", 1, true, echo_factory())
            .register_handler("B", "s1", 1, true, echo_factory());
        let frozen = registry.freeze();
        let pool = frozen.descriptor_pool();
        assert_eq!(pool.len(), 2);
        let mut pool = pool;
        let taken = pool.take_for_server("s1");
        assert!(taken[0].seq < taken[1].seq);
        assert_eq!(taken[0].name, "A");
    }

    #[test]
    fn pool_take_is_disjoint() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_handler("A", "s1", 1, true, echo_factory())
            .register_handler("B", "s2", 1, true, echo_factory());
        let frozen = registry.freeze();
        let mut pool = frozen.descriptor_pool();

        let s1 = pool.take_for_server("s1");
        assert_eq!(s1.len(), 1);
        assert_eq!(pool.len(), 1);
        assert!(pool.take_for_server("s1").is_empty());

        let s2 = pool.take_for_server("s2");
        assert_eq!(s2.len(), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn factories_build_working_handlers() {
        struct Upper;
        impl crate::pipeline::handler::ServerHandler for Upper {
            fn on_read(&mut self, ctx: &mut ConnectionContext, msg: Bytes) -> AppResult<()> {
                ctx.write(msg.to_ascii_uppercase());
                Ok(())
            }
        }

        let factory: HandlerFactory = Arc::new(|| Box::new(Upper));
        let mut handler = factory();
        let mut ctx =
            ConnectionContext::new(1, "127.0.0.1:1000".parse().unwrap(), "s1".to_string());
        handler.on_read(&mut ctx, Bytes::from_static(b"hi")).unwrap();
        assert_eq!(ctx.take_outbound(), vec![Bytes::from_static(b"HI")]);
    }
}
