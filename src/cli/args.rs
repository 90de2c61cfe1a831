use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// Command line arguments for TcpLink
#[derive(Parser, Debug)]
#[command(
    name = "tcplink",
    version = env!("CARGO_PKG_VERSION"),
    about = "Event-driven TCP client and server",
    long_about = "Connect to or serve raw TCP byte streams, printing connection lifecycle and traffic events as they happen."
)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress event output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    pub output: OutputFormat,

    /// How received and sent payloads are printed
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    pub display: DataFormat,

    /// Command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to a server and send each stdin line
    Client(ClientArgs),
    /// Listen for clients and broadcast each stdin line
    Server(ServerArgs),
    /// Connect, send one payload and disconnect
    Send(SendArgs),
    /// Configuration management commands
    Config(ConfigArgs),
    /// Display version information
    Version,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output, one object per line
    Json,
}

/// Payload encoding, for parsing input and rendering output
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataFormat {
    #[default]
    Text,
    Hex,
    Base64,
}

/// TCP client arguments
#[derive(ClapArgs, Debug)]
pub struct ClientArgs {
    /// Server host (defaults to the configured client host)
    pub host: Option<String>,
    /// Server port (defaults to the configured client port)
    pub port: Option<u16>,
    /// Connection timeout in milliseconds
    #[arg(short, long)]
    pub timeout: Option<u64>,
    /// Format of stdin lines
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: DataFormat,
}

/// TCP server arguments
#[derive(ClapArgs, Debug)]
pub struct ServerArgs {
    /// Listen port, 0 for an ephemeral port (defaults to the configured port)
    pub port: Option<u16>,
    /// Bind address
    #[arg(short, long)]
    pub bind: Option<String>,
    /// Pending connection queue length
    #[arg(long)]
    pub backlog: Option<u32>,
    /// Format of stdin lines
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: DataFormat,
}

/// One-shot send arguments
#[derive(ClapArgs, Debug)]
pub struct SendArgs {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Data to send
    pub data: String,
    /// Data format (text, hex, base64)
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: DataFormat,
    /// Milliseconds to keep reading replies after sending
    #[arg(short, long, default_value = "0")]
    pub wait: u64,
}

/// Configuration management arguments
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    /// Configuration subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Configuration management subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,
    /// Validate configuration
    Validate {
        /// Configuration file path
        file: Option<String>,
    },
    /// Create default configuration
    Init {
        /// Output file path
        #[arg(long)]
        file: Option<String>,
        /// Global configuration
        #[arg(short, long)]
        global: bool,
    },
    /// Print configuration file locations
    Path,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl std::fmt::Display for DataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataFormat::Text => write!(f, "text"),
            DataFormat::Hex => write!(f, "hex"),
            DataFormat::Base64 => write!(f, "base64"),
        }
    }
}
