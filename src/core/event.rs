use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use crate::core::connection::ConnectionId;
use crate::domain::endpoint::Endpoint;

/// Event category. Each category has its own ordered subscriber list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Client connected to its server
    ConnectSucceeded,
    /// Client could not reach its server
    ConnectFailed,
    /// A chunk of bytes arrived on a connection
    MessageReceived,
    /// A payload was written to a connection
    MessageSent,
    /// Server accepted a new connection
    NewConnection,
    /// A connection was closed, by either side or by a transport fault
    ConnectionClosed,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::ConnectSucceeded,
        EventKind::ConnectFailed,
        EventKind::MessageReceived,
        EventKind::MessageSent,
        EventKind::NewConnection,
        EventKind::ConnectionClosed,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            EventKind::ConnectSucceeded => 0,
            EventKind::ConnectFailed => 1,
            EventKind::MessageReceived => 2,
            EventKind::MessageSent => 3,
            EventKind::NewConnection => 4,
            EventKind::ConnectionClosed => 5,
        }
    }

    /// Data events carry a payload, lifecycle events do not.
    pub fn carries_payload(self) -> bool {
        matches!(self, EventKind::MessageReceived | EventKind::MessageSent)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::ConnectSucceeded => write!(f, "connect-succeeded"),
            EventKind::ConnectFailed => write!(f, "connect-failed"),
            EventKind::MessageReceived => write!(f, "message-received"),
            EventKind::MessageSent => write!(f, "message-sent"),
            EventKind::NewConnection => write!(f, "new-connection"),
            EventKind::ConnectionClosed => write!(f, "connection-closed"),
        }
    }
}

/// Which side of the link raised an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineRole {
    Client,
    Server,
}

impl std::fmt::Display for EngineRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineRole::Client => write!(f, "client"),
            EngineRole::Server => write!(f, "server"),
        }
    }
}

/// Process-unique identifier of a client or server engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EngineId(pub u64);

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

impl EngineId {
    pub(crate) fn next() -> Self {
        EngineId(NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "engine-{}", self.0)
    }
}

/// The engine an event originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventSource {
    pub engine: EngineId,
    pub role: EngineRole,
}

impl EventSource {
    pub(crate) fn new(role: EngineRole) -> Self {
        Self {
            engine: EngineId::next(),
            role,
        }
    }
}

/// Notification delivered to subscribers.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub source: EventSource,
    /// Remote peer, or the configured target for a failed connect
    pub remote: Endpoint,
    /// Connection the event belongs to, absent for a failed connect
    pub connection: Option<ConnectionId>,
    /// Bytes for data events, `None` for lifecycle events
    pub payload: Option<Vec<u8>>,
    pub timestamp: SystemTime,
}

impl Event {
    /// Create a lifecycle event without payload
    pub fn lifecycle(
        kind: EventKind,
        source: EventSource,
        remote: Endpoint,
        connection: Option<ConnectionId>,
    ) -> Self {
        Self {
            kind,
            source,
            remote,
            connection,
            payload: None,
            timestamp: SystemTime::now(),
        }
    }

    /// Create a data event carrying `payload`
    pub fn data(
        kind: EventKind,
        source: EventSource,
        remote: Endpoint,
        connection: ConnectionId,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            kind,
            source,
            remote,
            connection: Some(connection),
            payload: Some(payload),
            timestamp: SystemTime::now(),
        }
    }

    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Vec::len)
    }

    /// Payload as lossy UTF-8, empty for lifecycle events.
    pub fn payload_text(&self) -> String {
        self.payload
            .as_deref()
            .map(|data| String::from_utf8_lossy(data).into_owned())
            .unwrap_or_default()
    }
}
