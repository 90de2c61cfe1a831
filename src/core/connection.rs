use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::domain::endpoint::Endpoint;
use crate::domain::error::{LinkError, LinkResult};

/// Identity of a connection within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Atomic generator for monotonically increasing [`ConnectionId`]s.
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a single successful [`Connection::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// Bytes available on the socket, at most the buffer capacity
    Data(Vec<u8>),
    /// The read completed without delivering bytes; nothing to report
    Empty,
    /// The peer finished the stream or the connection was closed locally
    Closed,
}

/// Point-in-time view of a connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer: Endpoint,
    pub local: Option<Endpoint>,
    pub connected_at: SystemTime,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub closed: bool,
}

#[derive(Default)]
struct Counters {
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
}

struct ReadState {
    half: OwnedReadHalf,
    buffer: Vec<u8>,
}

/// One established TCP connection.
///
/// The stream is split so that a receive parked on the read half never blocks
/// a send. Writes are serialized by the mutex around the write half; a payload
/// passed to [`send`](Connection::send) is written contiguously. Closing flips
/// a watch flag that every pending receive and send races against, so a parked
/// read returns [`Received::Closed`] promptly.
pub struct Connection {
    id: ConnectionId,
    peer: Endpoint,
    local: Option<Endpoint>,
    connected_at: SystemTime,
    reader: Mutex<Option<ReadState>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    closed_tx: watch::Sender<bool>,
    close_reported: AtomicBool,
    counters: Counters,
}

impl Connection {
    /// Connect to `endpoint`, failing with [`LinkError::Connect`] when it is
    /// unreachable and [`LinkError::ConnectTimeout`] when it does not answer in time.
    pub async fn open(
        id: ConnectionId,
        endpoint: &Endpoint,
        buffer_size: usize,
        timeout: Duration,
        nodelay: bool,
    ) -> LinkResult<Self> {
        let stream = tokio::time::timeout(
            timeout,
            TcpStream::connect((endpoint.host(), endpoint.port())),
        )
        .await
        .map_err(|_| LinkError::ConnectTimeout(endpoint.clone()))?
        .map_err(|source| LinkError::Connect {
            endpoint: endpoint.clone(),
            source,
        })?;

        info!("TCP connection established to {}", endpoint);
        Self::from_stream(id, stream, buffer_size, nodelay)
    }

    /// Wrap an already connected stream, e.g. one returned by `accept`.
    pub fn from_stream(
        id: ConnectionId,
        stream: TcpStream,
        buffer_size: usize,
        nodelay: bool,
    ) -> LinkResult<Self> {
        if buffer_size == 0 {
            return Err(LinkError::InvalidInput(
                "receive buffer size must be greater than zero".to_string(),
            ));
        }

        if nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY: {}", e);
            }
        }

        let peer: Endpoint = stream.peer_addr()?.into();
        let local = stream.local_addr().ok().map(Endpoint::from);
        let (read_half, write_half) = stream.into_split();
        let (closed_tx, _) = watch::channel(false);

        Ok(Self {
            id,
            peer,
            local,
            connected_at: SystemTime::now(),
            reader: Mutex::new(Some(ReadState {
                half: read_half,
                buffer: vec![0u8; buffer_size],
            })),
            writer: Mutex::new(Some(write_half)),
            closed_tx,
            close_reported: AtomicBool::new(false),
            counters: Counters::default(),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> &Endpoint {
        &self.peer
    }

    pub fn local(&self) -> Option<&Endpoint> {
        self.local.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// Wait for the next chunk of bytes.
    ///
    /// Returns as soon as anything is readable; the buffer is not filled up
    /// first. End of stream and a local [`close`](Connection::close) both yield
    /// [`Received::Closed`]; transport faults yield [`LinkError::Receive`] and
    /// leave the connection closed.
    pub async fn receive(&self) -> LinkResult<Received> {
        let mut closed_rx = self.closed_tx.subscribe();
        let mut guard = self.reader.lock().await;

        let outcome = {
            let Some(state) = guard.as_mut() else {
                return Ok(Received::Closed);
            };
            let ReadState { half, buffer } = state;

            let read = tokio::select! {
                biased;
                _ = closed_rx.wait_for(|closed| *closed) => None,
                result = half.read(buffer.as_mut_slice()) => Some(result),
            };
            read.map(|result| result.map(|n| buffer[..n].to_vec()))
        };

        match outcome {
            None => {
                guard.take();
                Ok(Received::Closed)
            }
            Some(Ok(data)) if data.is_empty() => {
                // A zero-length read into a non-empty buffer is end of stream.
                debug!("Connection {} to {} reached end of stream", self.id, self.peer);
                guard.take();
                self.mark_closed();
                Ok(Received::Closed)
            }
            Some(Ok(data)) => {
                self.counters
                    .bytes_received
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
                self.counters.messages_received.fetch_add(1, Ordering::Relaxed);
                Ok(Received::Data(data))
            }
            Some(Err(e)) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                Ok(Received::Empty)
            }
            Some(Err(source)) => {
                guard.take();
                self.mark_closed();
                Err(LinkError::Receive {
                    peer: self.peer.clone(),
                    source,
                })
            }
        }
    }

    /// Write all of `data`.
    ///
    /// Concurrent callers queue on the write half, so payloads never
    /// interleave. Fails with [`LinkError::ConnectionClosed`] once the
    /// connection is closed and with [`LinkError::Send`] on a broken peer.
    pub async fn send(&self, data: &[u8]) -> LinkResult<()> {
        let mut closed_rx = self.closed_tx.subscribe();
        let mut guard = self.writer.lock().await;

        let outcome = {
            let Some(writer) = guard.as_mut() else {
                return Err(LinkError::ConnectionClosed(self.peer.clone()));
            };

            tokio::select! {
                biased;
                _ = closed_rx.wait_for(|closed| *closed) => None,
                result = async {
                    writer.write_all(data).await?;
                    writer.flush().await
                } => Some(result),
            }
        };

        match outcome {
            None => Err(LinkError::ConnectionClosed(self.peer.clone())),
            Some(Ok(())) => {
                self.counters
                    .bytes_sent
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
                self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Some(Err(source)) => {
                guard.take();
                self.mark_closed();
                Err(LinkError::Send {
                    peer: self.peer.clone(),
                    source,
                })
            }
        }
    }

    /// Release the socket. Calling this more than once is harmless.
    ///
    /// A shutdown fault on the write half is returned as [`LinkError::Close`]
    /// but the connection is closed either way.
    pub async fn close(&self) -> LinkResult<()> {
        if !self.mark_closed() {
            debug!("Closing connection {} to {}", self.id, self.peer);
        }

        // Pending receives drop the read half themselves once they see the flag.
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(source) = writer.shutdown().await {
                if source.kind() != ErrorKind::NotConnected {
                    return Err(LinkError::Close {
                        peer: self.peer.clone(),
                        source,
                    });
                }
            }
        }

        Ok(())
    }

    /// Returns `true` exactly once, for whoever gets to report the closure.
    pub(crate) fn claim_close_report(&self) -> bool {
        !self.close_reported.swap(true, Ordering::AcqRel)
    }

    /// Flip the closed flag, returning whether it was already set.
    fn mark_closed(&self) -> bool {
        self.closed_tx.send_replace(true)
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            peer: self.peer.clone(),
            local: self.local.clone(),
            connected_at: self.connected_at,
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
            messages_sent: self.counters.messages_sent.load(Ordering::Relaxed),
            closed: self.is_closed(),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}
