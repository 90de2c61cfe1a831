use crate::core::{
    Connection, ConnectionId, ConnectionInfo, ConnectionRegistry, EngineRole, Event,
    EventDispatcher, EventKind, EventSource, IdGenerator,
};
use crate::domain::config::ServerOptions;
use crate::domain::endpoint::Endpoint;
use crate::domain::error::{LinkError, LinkResult};
use crate::infrastructure::tcp::receive_until_closed;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept so a persistent fault (e.g. fd exhaustion)
/// does not spin the accept loop.
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(50);

/// Server lifecycle: `Idle → Listening → Closed`. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServerState {
    Idle,
    Listening,
    Closed,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerState::Idle => write!(f, "Idle"),
            ServerState::Listening => write!(f, "Listening"),
            ServerState::Closed => write!(f, "Closed"),
        }
    }
}

/// Outcome of a [`TcpServer::send_to_all`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Connections in the registry snapshot
    pub targets: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub local: Option<Endpoint>,
    pub state: ServerState,
    pub connection_count: usize,
    pub total_accepted: u64,
    pub accept_errors: u64,
    pub total_bytes_received: u64,
    pub total_bytes_sent: u64,
}

#[derive(Default)]
struct Totals {
    accepted: AtomicU64,
    accept_errors: AtomicU64,
    // Traffic of connections that are already gone
    closed_bytes_received: AtomicU64,
    closed_bytes_sent: AtomicU64,
}

struct ServerInner {
    options: ServerOptions,
    source: EventSource,
    dispatcher: EventDispatcher,
    registry: ConnectionRegistry,
    id_gen: IdGenerator,
    state: Mutex<ServerState>,
    local: Mutex<Option<Endpoint>>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    receive_tasks: Mutex<HashMap<ConnectionId, JoinHandle<()>>>,
    totals: Totals,
}

/// Event-driven TCP server.
///
/// One accept loop registers incoming connections and spawns a receive loop
/// per connection. Cloning yields another handle to the same server.
#[derive(Clone)]
pub struct TcpServer {
    inner: Arc<ServerInner>,
}

impl TcpServer {
    /// Server listening on all IPv4 interfaces at `port` (0 for ephemeral).
    pub fn new(port: u16, buffer_size: usize) -> Self {
        Self::with_options(ServerOptions::new(port, buffer_size))
    }

    pub fn with_options(options: ServerOptions) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ServerInner {
                options,
                source: EventSource::new(EngineRole::Server),
                dispatcher: EventDispatcher::new(),
                registry: ConnectionRegistry::new(),
                id_gen: IdGenerator::new(),
                state: Mutex::new(ServerState::Idle),
                local: Mutex::new(None),
                shutdown_tx,
                accept_task: Mutex::new(None),
                receive_tasks: Mutex::new(HashMap::new()),
                totals: Totals::default(),
            }),
        }
    }

    /// Subscriber lists for this server's events.
    pub fn events(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    pub fn subscribe<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.dispatcher.subscribe(kind, callback);
    }

    pub fn source(&self) -> EventSource {
        self.inner.source
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.options.buffer_size
    }

    pub fn state(&self) -> ServerState {
        *self.inner.state.lock()
    }

    pub fn is_listening(&self) -> bool {
        self.state() == ServerState::Listening
    }

    /// Bound address, available once listening.
    pub fn local_endpoint(&self) -> Option<Endpoint> {
        self.inner.local.lock().clone()
    }

    /// Remote endpoints of every registered connection.
    pub fn peers(&self) -> Vec<Endpoint> {
        self.inner.registry.peers()
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.inner.registry.infos()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn stats(&self) -> ServerStats {
        let live = self.inner.registry.infos();
        let totals = &self.inner.totals;
        ServerStats {
            local: self.local_endpoint(),
            state: self.state(),
            connection_count: live.len(),
            total_accepted: totals.accepted.load(Ordering::Relaxed),
            accept_errors: totals.accept_errors.load(Ordering::Relaxed),
            total_bytes_received: totals.closed_bytes_received.load(Ordering::Relaxed)
                + live.iter().map(|c| c.bytes_received).sum::<u64>(),
            total_bytes_sent: totals.closed_bytes_sent.load(Ordering::Relaxed)
                + live.iter().map(|c| c.bytes_sent).sum::<u64>(),
        }
    }

    /// Bind, listen with a queue of `backlog` pending connections and start
    /// the accept loop. Returns the bound endpoint.
    pub async fn start(&self, backlog: u32) -> LinkResult<Endpoint> {
        let bind = &self.inner.options.bind;
        let addr = resolve_bind_addr(bind).await?;

        let listener = {
            let mut state = self.inner.state.lock();
            if *state != ServerState::Idle {
                return Err(LinkError::InvalidState(format!(
                    "cannot start server in state {}",
                    *state
                )));
            }

            let listener = bind_listener(addr, backlog).map_err(|source| LinkError::Bind {
                endpoint: bind.clone(),
                source,
            })?;
            *state = ServerState::Listening;
            listener
        };

        let local: Endpoint = match listener.local_addr() {
            Ok(addr) => addr.into(),
            Err(_) => Endpoint::from(addr),
        };
        *self.inner.local.lock() = Some(local.clone());
        info!("TCP server listening on {} (backlog {})", local, backlog);

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            inner.accept_loop(listener).await;
        });
        *self.inner.accept_task.lock() = Some(handle);

        Ok(local)
    }

    /// Send `data` to every connection registered at call time.
    ///
    /// Publishes `MessageSent` per delivered copy. A failing connection is
    /// closed through its normal closure path and the rest still get the
    /// payload.
    pub async fn send_to_all(&self, data: &[u8]) -> BroadcastReport {
        let targets = self.inner.registry.snapshot();
        let mut report = BroadcastReport {
            targets: targets.len(),
            ..BroadcastReport::default()
        };

        for connection in targets {
            match self.inner.send_on(&connection, data).await {
                Ok(()) => report.delivered += 1,
                Err(_) => report.failed += 1,
            }
        }

        debug!(
            "Broadcast {} bytes: {}/{} delivered",
            data.len(),
            report.delivered,
            report.targets
        );
        report
    }

    /// Send `data` to a single registered connection.
    pub async fn send_to(&self, id: ConnectionId, data: &[u8]) -> LinkResult<()> {
        let connection = self
            .inner
            .registry
            .get(id)
            .ok_or_else(|| LinkError::InvalidInput(format!("Unknown connection {}", id)))?;
        self.inner.send_on(&connection, data).await
    }

    /// Stop accepting, release the listener and close every connection.
    ///
    /// Waits for the accept loop and all receive loops to finish, so once this
    /// returns the port is free and every `ConnectionClosed` has been
    /// published. Safe to call more than once.
    pub async fn close(&self) -> LinkResult<()> {
        let previous = std::mem::replace(&mut *self.inner.state.lock(), ServerState::Closed);
        if previous == ServerState::Closed {
            return Ok(());
        }

        info!("Stopping TCP server");
        self.inner.shutdown_tx.send_replace(true);

        let accept = self.inner.accept_task.lock().take();
        if let Some(handle) = accept {
            if let Err(e) = handle.await {
                warn!("Accept task completed with error: {}", e);
            }
        }

        for connection in self.inner.registry.seal_and_drain() {
            if let Err(e) = connection.close().await {
                warn!("Error while closing {}: {}", connection.peer(), e);
            }
        }

        let tasks: Vec<_> = self
            .inner
            .receive_tasks
            .lock()
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in tasks {
            if let Err(e) = handle.await {
                warn!("Receive task completed with error: {}", e);
            }
        }

        info!("TCP server stopped");
        Ok(())
    }
}

impl ServerInner {
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown_rx.wait_for(|stop| *stop) => break,
                result = listener.accept() => result,
            };

            match accepted {
                Ok((stream, addr)) => self.admit(stream, addr),
                Err(e) => {
                    let shutting_down = *shutdown_rx.borrow();
                    if !self.recover_from_accept_error(e, shutting_down).await {
                        break;
                    }
                }
            }
        }

        drop(listener);
        debug!("Accept loop stopped");
    }

    /// Returns whether the accept loop should keep going after `e`.
    async fn recover_from_accept_error(&self, e: std::io::Error, shutting_down: bool) -> bool {
        if shutting_down {
            return false;
        }
        self.totals.accept_errors.fetch_add(1, Ordering::Relaxed);
        error!("{}", LinkError::Accept(e));
        tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
        true
    }

    fn admit(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let id = self.id_gen.next_id();
        let connection = match Connection::from_stream(
            id,
            stream,
            self.options.buffer_size,
            self.options.nodelay,
        ) {
            Ok(connection) => Arc::new(connection),
            Err(e) => {
                self.totals.accept_errors.fetch_add(1, Ordering::Relaxed);
                error!("Failed to set up connection from {}: {}", addr, e);
                return;
            }
        };

        if !self.registry.insert(Arc::clone(&connection)) {
            debug!("Server closing, dropping connection from {}", addr);
            tokio::spawn(async move {
                let _ = connection.close().await;
            });
            return;
        }

        self.totals.accepted.fetch_add(1, Ordering::Relaxed);
        info!("New client connected: {} ({})", connection.peer(), id);

        self.dispatcher.publish(&Event::lifecycle(
            EventKind::NewConnection,
            self.source,
            connection.peer().clone(),
            Some(id),
        ));

        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            inner.receive_loop(connection).await;
        });

        let mut tasks = self.receive_tasks.lock();
        tasks.retain(|_, task| !task.is_finished());
        tasks.insert(id, handle);
    }

    async fn receive_loop(&self, connection: Arc<Connection>) {
        let failure = receive_until_closed(&connection, &self.dispatcher, self.source).await;
        if let Some(e) = &failure {
            warn!("Error handling client {}: {}", connection.peer(), e);
        }

        self.close_connection(&connection).await;
        self.receive_tasks.lock().remove(&connection.id());
    }

    async fn send_on(&self, connection: &Connection, data: &[u8]) -> LinkResult<()> {
        match connection.send(data).await {
            Ok(()) => {
                self.dispatcher.publish(&Event::data(
                    EventKind::MessageSent,
                    self.source,
                    connection.peer().clone(),
                    connection.id(),
                    data.to_vec(),
                ));
                Ok(())
            }
            Err(e) => {
                warn!("Failed to send to {}: {}", connection.peer(), e);
                self.close_connection(connection).await;
                Err(e)
            }
        }
    }

    /// Closure path shared by read faults, write faults and shutdown. The
    /// registry entry is gone before `ConnectionClosed` is published.
    async fn close_connection(&self, connection: &Connection) {
        if let Err(e) = connection.close().await {
            debug!("Error while closing {}: {}", connection.peer(), e);
        }
        self.registry.remove(connection.id());

        if !connection.claim_close_report() {
            return;
        }

        let info = connection.info();
        self.totals
            .closed_bytes_received
            .fetch_add(info.bytes_received, Ordering::Relaxed);
        self.totals
            .closed_bytes_sent
            .fetch_add(info.bytes_sent, Ordering::Relaxed);

        info!("Client disconnected: {} ({})", connection.peer(), connection.id());
        self.dispatcher.publish(&Event::lifecycle(
            EventKind::ConnectionClosed,
            self.source,
            connection.peer().clone(),
            Some(connection.id()),
        ));
    }
}

async fn resolve_bind_addr(bind: &Endpoint) -> LinkResult<SocketAddr> {
    if let Some(addr) = bind.socket_addr() {
        return Ok(addr);
    }

    tokio::net::lookup_host((bind.host(), bind.port()))
        .await
        .map_err(|source| LinkError::Bind {
            endpoint: bind.clone(),
            source,
        })?
        .next()
        .ok_or_else(|| LinkError::Bind {
            endpoint: bind.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "bind host resolved to no address",
            ),
        })
}

fn bind_listener(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    #[cfg(not(windows))]
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}
