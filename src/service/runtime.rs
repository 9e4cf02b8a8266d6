use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::{broadcast, mpsc};
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::network::{Connection, IdlePolicy};
use crate::pipeline::PipelineSpec;

use super::config::EndpointConfig;
use super::{AppResult, ServerError, ShutdownSignal};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

const READ_BUFFER_SIZE: usize = 4 * 1024;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_QUIESCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of one server runtime. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Initializing,
    Bound,
    Running,
    ShuttingDown,
    Stopped,
}

/// Reactor flavor selected by a runtime capability probe, never a compile
/// error on hosts without the native transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Edge-triggered native reactor (Linux epoll).
    Native,
    /// Portable reactor fallback.
    Portable,
}

impl Transport {
    fn probe(requested: bool) -> Transport {
        if requested && cfg!(target_os = "linux") {
            Transport::Native
        } else {
            Transport::Portable
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Native => write!(f, "native (edge-triggered epoll)"),
            Transport::Portable => write!(f, "portable"),
        }
    }
}

/// One independently configured listening endpoint: its acceptor and worker
/// pools, the listening socket and every connection accepted through it.
/// Pools are never shared across servers, so a fault in one server's
/// handlers cannot starve another's.
pub struct ServerRuntime {
    config: EndpointConfig,
    spec: Arc<PipelineSpec>,
    state: Arc<Mutex<ServerState>>,
    transport: Transport,
    boss_rt: Option<Runtime>,
    worker_rt: Option<Runtime>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: Option<mpsc::Sender<()>>,
    shutdown_complete_rx: Option<mpsc::Receiver<()>>,
    active: Arc<DashMap<u64, SocketAddr>>,
}

impl ServerRuntime {
    pub fn new(config: EndpointConfig, spec: PipelineSpec) -> ServerRuntime {
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);
        ServerRuntime {
            config,
            spec: Arc::new(spec),
            state: Arc::new(Mutex::new(ServerState::Created)),
            transport: Transport::Portable,
            boss_rt: None,
            worker_rt: None,
            notify_shutdown,
            shutdown_complete_tx: Some(shutdown_complete_tx),
            shutdown_complete_rx: Some(shutdown_complete_rx),
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn chain_summary(&self) -> Vec<String> {
        self.spec.summary()
    }

    pub fn active_connections(&self) -> usize {
        self.active.len()
    }

    /// Allocates the acceptor/worker pools, probes the transport, binds the
    /// listening socket and enters `Running`. A bind failure leaves no
    /// resource behind and is escalated by the orchestrator (fail-together).
    pub fn start(&mut self) -> AppResult<()> {
        {
            let mut state = self.state.lock();
            if *state != ServerState::Created {
                return Err(ServerError::IllegalState(format!(
                    "server `{}` cannot start from state {:?}",
                    self.config.name, *state
                )));
            }
            *state = ServerState::Initializing;
        }
        info!(
            server = %self.config.name,
            port = self.config.port,
            "server runtime initializing"
        );

        let boss_threads = EndpointConfig::sized_pool(self.config.boss_count);
        let worker_threads = EndpointConfig::sized_pool(self.config.worker_count);
        let boss_rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(boss_threads)
            .thread_name(format!("{}-boss", self.config.name))
            .enable_all()
            .build()?;
        let worker_rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name(format!("{}-worker", self.config.name))
            .enable_all()
            .build()?;

        self.transport = Transport::probe(self.config.use_native_transport);
        if self.config.use_native_transport && self.transport == Transport::Portable {
            info!(
                server = %self.config.name,
                "native transport unavailable on this host, using portable reactor"
            );
        }

        let std_listener = self.bind_listener()?;
        let listener = {
            let _guard = boss_rt.enter();
            TcpListener::from_std(std_listener).map_err(|source| ServerError::Bind {
                server: self.config.name.clone(),
                port: self.config.port,
                source,
            })?
        };
        *self.state.lock() = ServerState::Bound;
        info!(
            server = %self.config.name,
            port = self.config.port,
            transport = %self.transport,
            boss_threads,
            worker_threads,
            "server bound"
        );

        let shutdown_complete_tx = self
            .shutdown_complete_tx
            .clone()
            .ok_or_else(|| ServerError::IllegalState("shutdown channel already closed".into()))?;
        boss_rt.spawn(accept_loop(AcceptLoop {
            listener,
            worker_handle: worker_rt.handle().clone(),
            spec: self.spec.clone(),
            server_name: self.config.name.clone(),
            keep_alive: self.config.keep_alive,
            tcp_no_delay: self.config.tcp_no_delay,
            idle: self.spec.idle_policy(),
            notify_shutdown: self.notify_shutdown.clone(),
            shutdown_complete_tx,
            active: self.active.clone(),
            state: self.state.clone(),
        }));

        self.boss_rt = Some(boss_rt);
        self.worker_rt = Some(worker_rt);
        *self.state.lock() = ServerState::Running;
        info!(
            server = %self.config.name,
            port = self.config.port,
            "server running"
        );
        Ok(())
    }

    fn bind_listener(&self) -> AppResult<std::net::TcpListener> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let bind = || -> std::io::Result<std::net::TcpListener> {
            let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
            socket.set_reuse_address(true)?;
            socket.set_nonblocking(true)?;
            socket.bind(&addr.into())?;
            socket.listen(self.config.backlog)?;
            Ok(socket.into())
        };
        bind().map_err(|source| {
            error!(
                server = %self.config.name,
                port = self.config.port,
                error = %source,
                "bind failed"
            );
            ServerError::Bind {
                server: self.config.name.clone(),
                port: self.config.port,
                source,
            }
        })
    }

    /// Graceful shutdown: stop accepting, close the listener, drain
    /// in-flight connections, then shut the worker pool down, then the
    /// acceptor pool. Idempotent; on a `Stopped` runtime it is a no-op.
    /// Resource-release failures are logged and teardown continues.
    pub fn shutdown(&mut self) -> AppResult<()> {
        {
            let mut state = self.state.lock();
            match *state {
                ServerState::ShuttingDown | ServerState::Stopped => return Ok(()),
                ServerState::Created => {
                    *state = ServerState::Stopped;
                    return Ok(());
                }
                _ => *state = ServerState::ShuttingDown,
            }
        }
        info!(
            server = %self.config.name,
            port = self.config.port,
            active_connections = self.active.len(),
            "server shutting down"
        );

        // wakes the accept loop (which closes the listener) and every
        // connection task
        let _ = self.notify_shutdown.send(());
        drop(self.shutdown_complete_tx.take());

        if let (Some(mut rx), Some(worker_rt)) =
            (self.shutdown_complete_rx.take(), self.worker_rt.as_ref())
        {
            let drained = worker_rt.block_on(async {
                time::timeout(DRAIN_TIMEOUT, async {
                    while rx.recv().await.is_some() {}
                })
                .await
                .is_ok()
            });
            if !drained {
                let err = ServerError::Shutdown(format!(
                    "server `{}`: {} in-flight connections did not drain within {:?}",
                    self.config.name,
                    self.active.len(),
                    DRAIN_TIMEOUT
                ));
                warn!(error = %err, "continuing teardown");
            }
        }

        if let Some(rt) = self.worker_rt.take() {
            rt.shutdown_timeout(POOL_QUIESCE_TIMEOUT);
        }
        if let Some(rt) = self.boss_rt.take() {
            rt.shutdown_timeout(POOL_QUIESCE_TIMEOUT);
        }

        *self.state.lock() = ServerState::Stopped;
        info!(
            server = %self.config.name,
            port = self.config.port,
            "server stopped"
        );
        Ok(())
    }
}

impl Drop for ServerRuntime {
    fn drop(&mut self) {
        debug!(server = %self.config.name, "server runtime dropped");
    }
}

struct AcceptLoop {
    listener: TcpListener,
    worker_handle: Handle,
    spec: Arc<PipelineSpec>,
    server_name: String,
    keep_alive: bool,
    tcp_no_delay: bool,
    idle: IdlePolicy,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
    active: Arc<DashMap<u64, SocketAddr>>,
    state: Arc<Mutex<ServerState>>,
}

/// Accepts connections and dispatches them to the worker pool; nothing
/// else runs on the acceptor pool.
async fn accept_loop(ctx: AcceptLoop) {
    let AcceptLoop {
        listener,
        worker_handle,
        spec,
        server_name,
        keep_alive,
        tcp_no_delay,
        idle,
        notify_shutdown,
        shutdown_complete_tx,
        active,
        state,
    } = ctx;
    let mut shutdown = ShutdownSignal::subscribe(&notify_shutdown);

    loop {
        let accepted = tokio::select! {
            res = accept_with_backoff(&listener) => res,
            _ = shutdown.recv() => {
                debug!(server = %server_name, "accept loop received shutdown signal");
                break;
            }
        };
        let (socket, peer_addr) = match accepted {
            Ok(pair) => pair,
            Err(err) => {
                error!(server = %server_name, error = %err, "accept failed, server exits accept loop");
                record_accept_failure(&state);
                break;
            }
        };

        apply_socket_options(&socket, keep_alive, tcp_no_delay, &server_name);

        let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        active.insert(connection_id, peer_addr);
        debug!(
            server = %server_name,
            connection_id,
            peer = %peer_addr,
            "accepted connection"
        );

        let connection = Connection::new(
            socket,
            connection_id,
            peer_addr,
            server_name.clone(),
            spec.instantiate(),
            idle,
            ShutdownSignal::subscribe(&notify_shutdown),
            READ_BUFFER_SIZE,
        );
        let active = active.clone();
        let complete_tx = shutdown_complete_tx.clone();
        let server = server_name.clone();
        worker_handle.spawn(async move {
            // held until the connection fully quiesces; the runtime's drain
            // waits on it
            let _complete_tx = complete_tx;
            if let Err(err) = connection.run().await {
                error!(server = %server, connection_id, error = %err, "connection error");
            }
            active.remove(&connection_id);
        });
    }
    // listener drops here: the port is released before the pools shut down
    drop(listener);
    debug!(server = %server_name, "accept loop exited");
}

/// Marks the runtime stopped when its accept loop dies outside of a
/// requested shutdown, so state queries never report `Running` for a
/// server that can no longer accept. During a requested shutdown the state
/// is left to the teardown path.
fn record_accept_failure(state: &Mutex<ServerState>) -> bool {
    let mut state = state.lock();
    match *state {
        ServerState::Bound | ServerState::Running => {
            *state = ServerState::Stopped;
            true
        }
        _ => false,
    }
}

async fn accept_with_backoff(listener: &TcpListener) -> AppResult<(TcpStream, SocketAddr)> {
    let mut backoff = 1;
    loop {
        match listener.accept().await {
            Ok(pair) => return Ok(pair),
            Err(err) => {
                if backoff > 64 {
                    return Err(ServerError::RuntimeIo(format!("accept error: {}", err)));
                }
            }
        }
        time::sleep(Duration::from_secs(backoff)).await;
        backoff *= 2;
    }
}

fn apply_socket_options(socket: &TcpStream, keep_alive: bool, tcp_no_delay: bool, server: &str) {
    if let Err(err) = socket.set_nodelay(tcp_no_delay) {
        warn!(server = %server, error = %err, "failed to set TCP_NODELAY");
    }
    if let Err(err) = socket2::SockRef::from(socket).set_keepalive(keep_alive) {
        warn!(server = %server, error = %err, "failed to set SO_KEEPALIVE");
    }
}

#[cfg(test)]
mod tests {
    use crate::pipeline::{EchoHandler, HandlerRegistry, PipelineBuilder};

    use super::*;

    fn runtime_for(name: &str, port: u16) -> ServerRuntime {
        let config = EndpointConfig {
            name: name.to_string(),
            port,
            boss_count: 1,
            worker_count: 1,
            reader_idle_time_seconds: 0,
            writer_idle_time_seconds: 0,
            all_idle_time_seconds: 0,
            handler_name: "EchoHandler".to_string(),
            keep_alive: true,
            backlog: 10,
            tcp_no_delay: true,
            decoder_name: None,
            encoder_name: None,
            use_native_transport: true,
        };
        let mut registry = HandlerRegistry::new();
        registry.register_handler(
            "EchoHandler",
            name,
            1,
            true,
            Arc::new(|| Box::new(EchoHandler)),
        );
        let frozen = registry.freeze();
        let mut pool = frozen.descriptor_pool();
        let spec = PipelineBuilder::build(&config, &mut pool, &frozen).unwrap();
        ServerRuntime::new(config, spec)
    }

    #[test]
    fn shutdown_before_start_is_terminal_noop() {
        let mut runtime = runtime_for("never-started", 9999);
        assert_eq!(runtime.state(), ServerState::Created);
        runtime.shutdown().unwrap();
        assert_eq!(runtime.state(), ServerState::Stopped);
        // idempotent
        runtime.shutdown().unwrap();
        assert_eq!(runtime.state(), ServerState::Stopped);
    }

    #[test]
    fn start_from_stopped_is_rejected() {
        let mut runtime = runtime_for("stopped", 9998);
        runtime.shutdown().unwrap();
        match runtime.start() {
            Err(ServerError::IllegalState(_)) => {}
            other => panic!("expected illegal state, got {:?}", other),
        }
    }

    #[test]
    fn accept_failure_marks_runtime_stopped() {
        let state = Mutex::new(ServerState::Running);
        assert!(record_accept_failure(&state));
        assert_eq!(*state.lock(), ServerState::Stopped);
    }

    #[test]
    fn accept_failure_does_not_clobber_requested_shutdown() {
        let state = Mutex::new(ServerState::ShuttingDown);
        assert!(!record_accept_failure(&state));
        assert_eq!(*state.lock(), ServerState::ShuttingDown);

        let stopped = Mutex::new(ServerState::Stopped);
        assert!(!record_accept_failure(&stopped));
        assert_eq!(*stopped.lock(), ServerState::Stopped);
    }

    #[test]
    fn transport_probe_respects_request() {
        assert_eq!(Transport::probe(false), Transport::Portable);
        if cfg!(target_os = "linux") {
            assert_eq!(Transport::probe(true), Transport::Native);
        } else {
            assert_eq!(Transport::probe(true), Transport::Portable);
        }
    }
}
