//! Connection-level networking: the per-connection event loop and the
//! idle-timeout policy.
//!
//! The reactor itself (epoll/kqueue/IOCP) is tokio's; this module owns what
//! happens to a connection after accept: chain dispatch in FIFO order,
//! idle detection and reclamation, and fault isolation.

pub use idle::IdlePolicy;

pub(crate) use connection::Connection;

mod connection;
mod idle;
