use thiserror::Error;

use crate::domain::endpoint::Endpoint;

/// TcpLink unified error type
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection to {0} timed out")]
    ConnectTimeout(Endpoint),

    #[error("Failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("Accept error: {0}")]
    Accept(#[source] std::io::Error),

    #[error("Receive error from {peer}: {source}")]
    Receive {
        peer: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("Send error to {peer}: {source}")]
    Send {
        peer: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("Close error for {peer}: {source}")]
    Close {
        peer: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection to {0} is closed")]
    ConnectionClosed(Endpoint),

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Output error: {0}")]
    Output(String),

    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Whether the error means the connection it happened on is gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            LinkError::Receive { .. } | LinkError::Send { .. } | LinkError::ConnectionClosed(_)
        )
    }
}

pub type LinkResult<T> = Result<T, LinkError>;
