use crate::cli::args::{DataFormat, OutputFormat};
use crate::core::{ConnectionInfo, Event};
use crate::domain::config::LinkConfig;
use crate::infrastructure::tcp::ServerStats;
use base64::Engine;
use serde::Serialize;
use std::io::{self, Write};
use std::time::UNIX_EPOCH;

/// Output writer trait for different formats
pub trait OutputWriter {
    fn write_event(&self, event: &Event) -> Result<(), OutputError>;
    fn write_connections(&self, connections: &[ConnectionInfo]) -> Result<(), OutputError>;
    fn write_stats(&self, stats: &ServerStats) -> Result<(), OutputError>;
    fn write_config(&self, config: &LinkConfig) -> Result<(), OutputError>;
    fn write_message(&self, message: &str) -> Result<(), OutputError>;
    fn write_error(&self, error: &str) -> Result<(), OutputError>;
}

/// Output formatting errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("TOML serialization error: {0}")]
    TomlError(#[from] toml::ser::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl From<OutputError> for crate::domain::error::LinkError {
    fn from(err: OutputError) -> Self {
        Self::Output(err.to_string())
    }
}

/// Render a payload for display.
pub fn render_payload(data: &[u8], format: DataFormat) -> String {
    match format {
        DataFormat::Text => String::from_utf8_lossy(data).into_owned(),
        DataFormat::Hex => hex::encode(data),
        DataFormat::Base64 => base64::engine::general_purpose::STANDARD.encode(data),
    }
}

/// JSON shape of an [`Event`] line
#[derive(Serialize)]
struct EventRecord<'a> {
    event: String,
    engine: u64,
    role: String,
    remote: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    encoding: &'a str,
    timestamp_ms: u128,
}

/// Console output writer
///
/// Events, statistics and messages go to stdout, errors to stderr. Quiet mode
/// drops events only.
pub struct ConsoleWriter {
    format: OutputFormat,
    display: DataFormat,
    quiet: bool,
}

impl ConsoleWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            display: DataFormat::Text,
            quiet: false,
        }
    }

    pub fn with_display(mut self, display: DataFormat) -> Self {
        self.display = display;
        self
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// One JSON array in JSON mode, three lines per connection in text mode.
    pub fn format_connections(
        &self,
        connections: &[ConnectionInfo],
    ) -> Result<Vec<String>, OutputError> {
        match self.format {
            OutputFormat::Text => Ok(connections
                .iter()
                .flat_map(|connection| {
                    [
                        format!("Connection {} from {}", connection.id, connection.peer),
                        format!(
                            "  Data: {} bytes sent, {} bytes received",
                            connection.bytes_sent, connection.bytes_received
                        ),
                        format!(
                            "  Messages: {} sent, {} received",
                            connection.messages_sent, connection.messages_received
                        ),
                    ]
                })
                .collect()),
            OutputFormat::Json => Ok(vec![serde_json::to_string(connections)?]),
        }
    }

    /// Single-line rendering of an event in the configured format.
    pub fn format_event(&self, event: &Event) -> Result<String, OutputError> {
        match self.format {
            OutputFormat::Text => {
                let connection = event
                    .connection
                    .map(|id| format!(" {}", id))
                    .unwrap_or_default();
                let mut line = format!(
                    "[{} {}] {} {}{}",
                    event.source.role, event.source.engine, event.kind, event.remote, connection
                );
                if let Some(payload) = &event.payload {
                    line.push_str(&format!(
                        " ({} bytes): {}",
                        payload.len(),
                        render_payload(payload, self.display)
                    ));
                }
                Ok(line)
            }
            OutputFormat::Json => {
                let record = EventRecord {
                    event: event.kind.to_string(),
                    engine: event.source.engine.0,
                    role: event.source.role.to_string(),
                    remote: event.remote.to_string(),
                    connection: event.connection.map(|id| id.0),
                    bytes: event.payload.as_ref().map(Vec::len),
                    payload: event
                        .payload
                        .as_deref()
                        .map(|data| render_payload(data, self.display)),
                    encoding: match self.display {
                        DataFormat::Text => "text",
                        DataFormat::Hex => "hex",
                        DataFormat::Base64 => "base64",
                    },
                    timestamp_ms: event
                        .timestamp
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_millis())
                        .unwrap_or_default(),
                };
                Ok(serde_json::to_string(&record)?)
            }
        }
    }

    fn print_line(&self, line: &str) -> Result<(), OutputError> {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{}", line)?;
        handle.flush()?;
        Ok(())
    }
}

impl OutputWriter for ConsoleWriter {
    fn write_event(&self, event: &Event) -> Result<(), OutputError> {
        if self.quiet {
            return Ok(());
        }
        let line = self.format_event(event)?;
        self.print_line(&line)
    }

    fn write_connections(&self, connections: &[ConnectionInfo]) -> Result<(), OutputError> {
        for line in self.format_connections(connections)? {
            println!("{}", line);
        }
        Ok(())
    }

    fn write_stats(&self, stats: &ServerStats) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                println!("Server Statistics:");
                if let Some(local) = &stats.local {
                    println!("  Listening on: {}", local);
                }
                println!("  State: {}", stats.state);
                println!("  Live connections: {}", stats.connection_count);
                println!("  Total accepted: {}", stats.total_accepted);
                println!("  Accept errors: {}", stats.accept_errors);
                println!("  Total bytes received: {}", stats.total_bytes_received);
                println!("  Total bytes sent: {}", stats.total_bytes_sent);
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(stats)?);
            }
        }
        Ok(())
    }

    fn write_config(&self, config: &LinkConfig) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                print!("{}", toml::to_string_pretty(config)?);
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(config)?);
            }
        }
        Ok(())
    }

    fn write_message(&self, message: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "message": message,
                    "level": "info"
                });
                self.print_line(&serde_json::to_string(&output)?)
            }
            OutputFormat::Text => self.print_line(message),
        }
    }

    fn write_error(&self, error: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "error": error,
                    "level": "error"
                });
                eprintln!("{}", serde_json::to_string(&output)?);
            }
            OutputFormat::Text => {
                eprintln!("Error: {}", error);
            }
        }
        Ok(())
    }
}
