//! TcpLink Library
//!
//! Event-driven TCP client and server engines. Applications register
//! callbacks per event category and exchange raw byte chunks with peers.

pub mod cli;
pub mod core;
pub mod domain;
pub mod infrastructure;

pub use crate::core::{
    Connection, ConnectionId, ConnectionInfo, ConnectionRegistry, DispatchReport, EngineId,
    EngineRole, Event, EventDispatcher, EventKind, EventSource, Received, SubscriberFault,
};
pub use crate::domain::config::{ClientOptions, LinkConfig, ServerOptions};
pub use crate::domain::endpoint::Endpoint;
pub use crate::domain::error::{LinkError, LinkResult};
pub use crate::infrastructure::tcp::{
    BroadcastReport, ClientState, ServerState, ServerStats, TcpClient, TcpServer,
};
