// TCP module - Client and server engines
pub mod client;
pub mod server;

pub use client::{ClientState, TcpClient};
pub use server::{BroadcastReport, ServerState, ServerStats, TcpServer};

use crate::core::{Connection, Event, EventDispatcher, EventKind, EventSource, Received};
use crate::domain::error::LinkError;
use tracing::debug;

/// Forward chunks from `connection` to `MessageReceived` subscribers until the
/// connection closes. Returns the transport fault that ended the loop, if any.
pub(crate) async fn receive_until_closed(
    connection: &Connection,
    dispatcher: &EventDispatcher,
    source: EventSource,
) -> Option<LinkError> {
    loop {
        match connection.receive().await {
            Ok(Received::Data(data)) => {
                debug!("Received {} bytes from {}", data.len(), connection.peer());
                dispatcher.publish(&Event::data(
                    EventKind::MessageReceived,
                    source,
                    connection.peer().clone(),
                    connection.id(),
                    data,
                ));
            }
            Ok(Received::Empty) => continue,
            Ok(Received::Closed) => return None,
            Err(e) => return Some(e),
        }
    }
}
