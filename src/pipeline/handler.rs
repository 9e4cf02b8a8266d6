use std::net::SocketAddr;

use bytes::Bytes;

use crate::service::AppResult;
use crate::service::ServerError;

/// Idle notification delivered to the chain by the connection's idle
/// monitor. Reader-idle additionally closes the connection after the chain
/// has seen the event; writer-idle and all-idle are observable-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleEvent {
    ReaderIdle,
    WriterIdle,
    AllIdle,
}

/// Per-connection state handed to every handler callback.
///
/// Handlers queue outbound messages and request close through the context;
/// the connection task performs the actual socket I/O after dispatch
/// returns, so callbacks never block on the network.
#[derive(Debug)]
pub struct ConnectionContext {
    connection_id: u64,
    peer_addr: SocketAddr,
    server_name: String,
    outbound: Vec<Bytes>,
    close_requested: bool,
}

impl ConnectionContext {
    pub(crate) fn new(connection_id: u64, peer_addr: SocketAddr, server_name: String) -> Self {
        ConnectionContext {
            connection_id,
            peer_addr,
            server_name,
            outbound: Vec::new(),
            close_requested: false,
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Queues an outbound message. When an encoder is configured it frames
    /// each queued message; otherwise bytes go out verbatim.
    pub fn write(&mut self, msg: impl Into<Bytes>) {
        self.outbound.push(msg.into());
    }

    /// Asks the connection task to close the connection once the current
    /// event has been fully dispatched and pending writes are flushed.
    pub fn close(&mut self) {
        self.close_requested = true;
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    pub(crate) fn take_outbound(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.outbound)
    }
}

/// A business protocol handler installed into a server's pipeline.
///
/// Dispatch is synchronous: the reactor delivers events in per-connection
/// FIFO order and `on_inactive` always arrives after every prior read.
/// Callbacks must not block their worker thread for unbounded time; long
/// work belongs elsewhere.
pub trait ServerHandler: Send {
    fn on_active(&mut self, _ctx: &mut ConnectionContext) {}

    /// Called for every inbound message. Without a configured decoder, `msg`
    /// is the read bytes decoded as text with surrounding whitespace
    /// trimmed; with a decoder, `msg` is one decoded frame.
    fn on_read(&mut self, ctx: &mut ConnectionContext, msg: Bytes) -> AppResult<()>;

    fn on_idle(&mut self, _ctx: &mut ConnectionContext, _event: IdleEvent) {}

    fn on_inactive(&mut self, _ctx: &mut ConnectionContext) {}

    fn on_error(&mut self, _ctx: &mut ConnectionContext, _err: &ServerError) {}
}

/// Built-in echo handler, stateless and sharable. Writes every inbound
/// message straight back to the peer.
#[derive(Debug, Default, Clone)]
pub struct EchoHandler;

impl ServerHandler for EchoHandler {
    fn on_read(&mut self, ctx: &mut ConnectionContext, msg: Bytes) -> AppResult<()> {
        ctx.write(msg);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:4242".parse().unwrap()
    }

    #[test]
    fn echo_queues_message_back() {
        let mut ctx = ConnectionContext::new(1, test_addr(), "echo".to_string());
        let mut handler = EchoHandler;
        handler
            .on_read(&mut ctx, Bytes::from_static(b"ping"))
            .unwrap();
        assert_eq!(ctx.take_outbound(), vec![Bytes::from_static(b"ping")]);
        assert!(!ctx.close_requested());
    }

    #[test]
    fn close_request_sticks() {
        let mut ctx = ConnectionContext::new(7, test_addr(), "echo".to_string());
        assert!(!ctx.close_requested());
        ctx.close();
        assert!(ctx.close_requested());
    }
}
