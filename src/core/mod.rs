// Core module - Connection, event dispatch and registry shared by client and server
pub mod connection;
pub mod dispatcher;
pub mod event;
pub mod registry;

pub use connection::{Connection, ConnectionId, ConnectionInfo, IdGenerator, Received};
pub use dispatcher::{DispatchReport, EventDispatcher, Subscriber, SubscriberFault};
pub use event::{EngineId, EngineRole, Event, EventKind, EventSource};
pub use registry::ConnectionRegistry;
