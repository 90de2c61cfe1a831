use crate::core::{
    Connection, ConnectionInfo, Event, EventDispatcher, EventKind, EventSource, EngineRole,
    IdGenerator,
};
use crate::domain::config::ClientOptions;
use crate::domain::endpoint::Endpoint;
use crate::domain::error::{LinkError, LinkResult};
use crate::infrastructure::tcp::receive_until_closed;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Client lifecycle.
///
/// `Idle → Connecting → {Connected, ConnectFailed}` and `Connected → Closed`.
/// `Closed` is terminal; a failed client can still be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClientState {
    Idle,
    Connecting,
    Connected,
    ConnectFailed,
    Closed,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientState::Idle => write!(f, "Idle"),
            ClientState::Connecting => write!(f, "Connecting"),
            ClientState::Connected => write!(f, "Connected"),
            ClientState::ConnectFailed => write!(f, "ConnectFailed"),
            ClientState::Closed => write!(f, "Closed"),
        }
    }
}

struct ClientInner {
    options: ClientOptions,
    source: EventSource,
    dispatcher: EventDispatcher,
    id_gen: IdGenerator,
    state: Mutex<ClientState>,
    connection: Mutex<Option<Arc<Connection>>>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

/// Event-driven TCP client owning a single connection.
///
/// Cloning yields another handle to the same client, so sends can be issued
/// from several tasks at once.
#[derive(Clone)]
pub struct TcpClient {
    inner: Arc<ClientInner>,
}

impl TcpClient {
    pub fn new(endpoint: Endpoint, buffer_size: usize) -> Self {
        Self::with_options(ClientOptions::new(endpoint, buffer_size))
    }

    pub fn with_options(options: ClientOptions) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                options,
                source: EventSource::new(EngineRole::Client),
                dispatcher: EventDispatcher::new(),
                id_gen: IdGenerator::new(),
                state: Mutex::new(ClientState::Idle),
                connection: Mutex::new(None),
                receive_task: Mutex::new(None),
            }),
        }
    }

    /// Subscriber lists for this client's events.
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

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.options.endpoint
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.options.buffer_size
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.inner.connection.lock().as_ref().map(|c| c.info())
    }

    /// Connect to the configured endpoint.
    ///
    /// On success publishes `ConnectSucceeded` and starts the receive loop. On
    /// failure publishes `ConnectFailed` and returns the connect error. Only an
    /// idle client can be started.
    pub async fn start(&self) -> LinkResult<()> {
        {
            let mut state = self.inner.state.lock();
            if *state != ClientState::Idle {
                return Err(LinkError::InvalidState(format!(
                    "cannot start client in state {}",
                    *state
                )));
            }
            *state = ClientState::Connecting;
        }

        let options = &self.inner.options;
        info!("Connecting to {}", options.endpoint);

        let opened = Connection::open(
            self.inner.id_gen.next_id(),
            &options.endpoint,
            options.buffer_size,
            options.connect_timeout,
            options.nodelay,
        )
        .await;

        let connection = match opened {
            Ok(connection) => Arc::new(connection),
            Err(e) => {
                warn!("Failed to connect to {}: {}", options.endpoint, e);
                {
                    let mut state = self.inner.state.lock();
                    if *state == ClientState::Connecting {
                        *state = ClientState::ConnectFailed;
                    }
                }
                self.inner.dispatcher.publish(&Event::lifecycle(
                    EventKind::ConnectFailed,
                    self.inner.source,
                    options.endpoint.clone(),
                    None,
                ));
                return Err(e);
            }
        };

        let closed_while_connecting = {
            let mut state = self.inner.state.lock();
            if *state == ClientState::Closed {
                true
            } else {
                *state = ClientState::Connected;
                *self.inner.connection.lock() = Some(Arc::clone(&connection));
                false
            }
        };
        if closed_while_connecting {
            let _ = connection.close().await;
            self.inner.dispatcher.publish(&Event::lifecycle(
                EventKind::ConnectFailed,
                self.inner.source,
                options.endpoint.clone(),
                None,
            ));
            return Err(LinkError::InvalidState(
                "client was closed while connecting".to_string(),
            ));
        }

        self.inner.dispatcher.publish(&Event::lifecycle(
            EventKind::ConnectSucceeded,
            self.inner.source,
            connection.peer().clone(),
            Some(connection.id()),
        ));

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            inner.receive_loop(connection).await;
        });
        *self.inner.receive_task.lock() = Some(handle);

        Ok(())
    }

    /// Write `data` to the server.
    ///
    /// Publishes `MessageSent` on success. A failed write closes the
    /// connection and reports `ConnectionClosed` once.
    pub async fn send(&self, data: &[u8]) -> LinkResult<()> {
        let connection = self
            .inner
            .connection
            .lock()
            .clone()
            .ok_or(LinkError::NotConnected)?;

        match connection.send(data).await {
            Ok(()) => {
                debug!("Sent {} bytes to {}", data.len(), connection.peer());
                self.inner.dispatcher.publish(&Event::data(
                    EventKind::MessageSent,
                    self.inner.source,
                    connection.peer().clone(),
                    connection.id(),
                    data.to_vec(),
                ));
                Ok(())
            }
            Err(e) => {
                if e.is_connection_lost() {
                    warn!("Send to {} failed: {}", connection.peer(), e);
                    if let Err(close_err) = connection.close().await {
                        debug!("Error while closing {}: {}", connection.peer(), close_err);
                    }
                    self.inner.report_closed(&connection);
                }
                Err(e)
            }
        }
    }

    /// Close the connection and wait for the receive loop to finish.
    ///
    /// Safe to call repeatedly and from any task.
    pub async fn close(&self) -> LinkResult<()> {
        let previous = std::mem::replace(&mut *self.inner.state.lock(), ClientState::Closed);

        let connection = self.inner.connection.lock().clone();
        if let Some(connection) = connection {
            if let Err(e) = connection.close().await {
                warn!("Error while closing {}: {}", connection.peer(), e);
            }
        }

        let handle = self.inner.receive_task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Receive task completed with error: {}", e);
            }
        }

        if previous != ClientState::Closed {
            info!("TCP client for {} closed", self.inner.options.endpoint);
        }
        Ok(())
    }
}

impl ClientInner {
    async fn receive_loop(&self, connection: Arc<Connection>) {
        let failure = receive_until_closed(&connection, &self.dispatcher, self.source).await;
        match &failure {
            Some(e) => warn!("Connection to {} failed: {}", connection.peer(), e),
            None => info!("TCP connection to {} closed", connection.peer()),
        }

        if let Err(e) = connection.close().await {
            debug!("Error while closing {}: {}", connection.peer(), e);
        }
        self.report_closed(&connection);
    }

    fn report_closed(&self, connection: &Connection) {
        if !connection.claim_close_report() {
            return;
        }

        *self.state.lock() = ClientState::Closed;
        self.dispatcher.publish(&Event::lifecycle(
            EventKind::ConnectionClosed,
            self.source,
            connection.peer().clone(),
            Some(connection.id()),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpSocket, TcpStream};

    fn counter(client: &TcpClient, kind: EventKind) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&count);
        client.subscribe(kind, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_client_creation() {
        let client = TcpClient::new(Endpoint::new("127.0.0.1", 9000), 1024);
        assert_eq!(client.state(), ClientState::Idle);
        assert_eq!(client.buffer_size(), 1024);
        assert!(!client.is_connected());
        assert!(client.connection_info().is_none());
    }

    #[tokio::test]
    async fn test_connect_failure_publishes_connect_failed_once() {
        let port = closed_port().await;
        let client = TcpClient::new(Endpoint::new("127.0.0.1", port), 1024);
        let failed = counter(&client, EventKind::ConnectFailed);
        let succeeded = counter(&client, EventKind::ConnectSucceeded);

        let result = client.start().await;

        assert!(matches!(result, Err(LinkError::Connect { .. })));
        assert_eq!(failed.load(Ordering::SeqCst), 1);
        assert_eq!(succeeded.load(Ordering::SeqCst), 0);
        assert_eq!(client.state(), ClientState::ConnectFailed);
    }

    #[tokio::test]
    async fn test_close_while_connecting_reports_one_outcome() {
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(1).unwrap();
        let local = listener.local_addr().unwrap();

        // Fill the accept queue so the next handshake stalls
        let mut backlog = Vec::new();
        for _ in 0..16 {
            let pending = TcpStream::connect(local);
            match tokio::time::timeout(Duration::from_millis(200), pending).await {
                Ok(Ok(stream)) => backlog.push(stream),
                _ => break,
            }
        }

        let client = Arc::new(TcpClient::with_options(
            ClientOptions::new(Endpoint::from(local), 1024)
                .with_connect_timeout(Duration::from_secs(10)),
        ));
        let failed = counter(&client, EventKind::ConnectFailed);
        let succeeded = counter(&client, EventKind::ConnectSucceeded);

        let starter = Arc::clone(&client);
        let attempt = tokio::spawn(async move { starter.start().await });
        while client.state() == ClientState::Idle {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.close().await.unwrap();

        let drain = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                backlog.push(stream);
            }
        });

        let result = tokio::time::timeout(Duration::from_secs(15), attempt)
            .await
            .expect("start did not finish")
            .unwrap();

        assert_eq!(
            failed.load(Ordering::SeqCst) + succeeded.load(Ordering::SeqCst),
            1
        );
        if result.is_err() {
            assert_eq!(failed.load(Ordering::SeqCst), 1);
        }
        assert_eq!(client.state(), ClientState::Closed);

        drain.abort();
    }

    #[tokio::test]
    async fn test_send_before_start_is_rejected() {
        let client = TcpClient::new(Endpoint::new("127.0.0.1", 9000), 1024);
        assert!(matches!(
            client.send(b"data").await,
            Err(LinkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_client_with_echo_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _server_handle = tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0; 1024];
                if let Ok(n) = socket.read(&mut buf).await {
                    let _ = socket.write_all(&buf[0..n]).await;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        });

        let client = TcpClient::new(Endpoint::from(addr), 1024);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        client.events().on_message_received(move |event| {
            let _ = tx.send(event.payload.clone().unwrap_or_default());
        });
        let sent = counter(&client, EventKind::MessageSent);
        let closed = counter(&client, EventKind::ConnectionClosed);

        client.start().await.unwrap();
        assert!(client.is_connected());

        client.send(b"ping").await.unwrap();
        let echoed = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(echoed, b"ping");
        assert_eq!(sent.load(Ordering::SeqCst), 1);

        client.close().await.unwrap();
        assert_eq!(client.state(), ClientState::Closed);
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        // Second close must not fault or report again
        client.close().await.unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _accept = tokio::spawn(async move {
            let _conn = listener.accept().await;
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let client = TcpClient::new(Endpoint::from(addr), 1024);
        client.start().await.unwrap();
        assert!(matches!(
            client.start().await,
            Err(LinkError::InvalidState(_))
        ));
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_disconnect_reports_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });

        let client = TcpClient::new(Endpoint::from(addr), 1024);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        client.events().on_connection_closed(move |event| {
            let _ = tx.send(event.remote.clone());
        });

        client.start().await.unwrap();
        let peer = accept.await.unwrap();
        drop(peer);

        let remote = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(remote, Endpoint::from(addr));
        assert_eq!(client.state(), ClientState::Closed);

        client.close().await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
