use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::endpoint::Endpoint;
use crate::domain::error::{LinkError, LinkResult};

/// TcpLink configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Settings shared by client and server
    #[serde(default)]
    pub global: GlobalConfig,
    /// Client defaults
    #[serde(default)]
    pub client: ClientConfig,
    /// Server defaults
    #[serde(default)]
    pub server: ServerConfig,
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Receive buffer capacity per connection, in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Disable Nagle's algorithm on every connection
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

/// Client connection defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server host
    #[serde(default = "default_client_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

/// Server listener defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Listen port (0 picks an ephemeral port)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Pending connection queue length
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_buffer_size() -> usize {
    1024
}

fn default_nodelay() -> bool {
    true
}

fn default_client_host() -> String {
    "127.0.0.1".to_string()
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_connect_timeout() -> u64 {
    3000
}

fn default_backlog() -> u32 {
    128
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            buffer_size: default_buffer_size(),
            nodelay: default_nodelay(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_client_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            backlog: default_backlog(),
        }
    }
}

impl LinkConfig {
    /// Reject values the engines cannot run with.
    pub fn validate(&self) -> LinkResult<()> {
        if self.global.buffer_size == 0 {
            return Err(LinkError::Config {
                message: "buffer_size must be greater than zero".to_string(),
            });
        }
        if self.server.backlog == 0 {
            return Err(LinkError::Config {
                message: "backlog must be greater than zero".to_string(),
            });
        }
        if self.client.connect_timeout_ms == 0 {
            return Err(LinkError::Config {
                message: "connect_timeout_ms must be greater than zero".to_string(),
            });
        }
        match self.global.log_level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            other => Err(LinkError::Config {
                message: format!("unknown log level '{}'", other),
            }),
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            endpoint: Endpoint::new(self.client.host.clone(), self.client.port),
            buffer_size: self.global.buffer_size,
            connect_timeout: Duration::from_millis(self.client.connect_timeout_ms),
            nodelay: self.global.nodelay,
        }
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            bind: Endpoint::new(self.server.bind.clone(), self.server.port),
            buffer_size: self.global.buffer_size,
            nodelay: self.global.nodelay,
        }
    }
}

/// Runtime options for a [`TcpClient`](crate::TcpClient).
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub endpoint: Endpoint,
    pub buffer_size: usize,
    pub connect_timeout: Duration,
    pub nodelay: bool,
}

impl ClientOptions {
    pub fn new(endpoint: Endpoint, buffer_size: usize) -> Self {
        Self {
            endpoint,
            buffer_size,
            connect_timeout: Duration::from_millis(default_connect_timeout()),
            nodelay: default_nodelay(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

/// Runtime options for a [`TcpServer`](crate::TcpServer).
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub bind: Endpoint,
    pub buffer_size: usize,
    pub nodelay: bool,
}

impl ServerOptions {
    pub fn new(port: u16, buffer_size: usize) -> Self {
        Self {
            bind: Endpoint::any(port),
            buffer_size,
            nodelay: default_nodelay(),
        }
    }

    pub fn with_bind(mut self, bind: Endpoint) -> Self {
        self.bind = bind;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}
