use crate::cli::args::{
    Args, ClientArgs, Command, ConfigArgs, ConfigCommand, DataFormat, SendArgs, ServerArgs,
};
use crate::cli::output::{ConsoleWriter, OutputWriter};
use crate::core::{EventDispatcher, EventKind};
use crate::domain::config::LinkConfig;
use crate::domain::endpoint::Endpoint;
use crate::domain::error::{LinkError, LinkResult};
use crate::infrastructure::config::ConfigManager;
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::tcp::{TcpClient, TcpServer};
use base64::Engine;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Execute CLI command
pub async fn execute_command(args: Args) -> LinkResult<()> {
    let writer = Arc::new(
        ConsoleWriter::new(args.output)
            .with_display(args.display)
            .with_quiet(args.quiet),
    );

    // Load configuration using ConfigManager
    let config_manager = ConfigManager::new()?;
    let loaded = match &args.config {
        Some(config_path) => config_manager.load_config_from_path(config_path.as_ref()),
        None => config_manager.load_config(),
    };

    // `config validate` reports a broken file instead of failing on it
    let config = match (&args.command, loaded) {
        (_, Ok(config)) => config,
        (Command::Config(_), Err(e)) => {
            warn!("Using defaults, configuration failed to load: {}", e);
            LinkConfig::default()
        }
        (_, Err(e)) => return Err(e),
    };

    // Initialize logging
    if !args.quiet {
        init_logging(&config.global.log_level, args.verbose)?;
    }

    match args.command {
        Command::Client(client_args) => execute_client_command(client_args, &writer, &config).await,
        Command::Server(server_args) => execute_server_command(server_args, &writer, &config).await,
        Command::Send(send_args) => execute_send_command(send_args, &writer, &config).await,
        Command::Config(config_args) => {
            execute_config_command(config_args, &writer, &config, &config_manager, &args.config)
        }
        Command::Version => {
            writer.write_message(&format!("tcplink {}", env!("CARGO_PKG_VERSION")))?;
            Ok(())
        }
    }
}

async fn execute_client_command(
    args: ClientArgs,
    writer: &Arc<ConsoleWriter>,
    config: &LinkConfig,
) -> LinkResult<()> {
    let mut options = config.client_options();
    if let Some(host) = args.host {
        options.endpoint = Endpoint::new(host, options.endpoint.port());
    }
    if let Some(port) = args.port {
        options.endpoint = Endpoint::new(options.endpoint.host(), port);
    }
    if let Some(timeout) = args.timeout {
        options = options.with_connect_timeout(Duration::from_millis(timeout));
    }

    let client = TcpClient::with_options(options);
    print_events(client.events(), writer);
    let mut closed_rx = closed_signal(client.events());

    client.start().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = closed_rx.wait_for(|closed| *closed) => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let data = match parse_data(&line, args.format) {
                        Ok(data) => data,
                        Err(e) => {
                            writer.write_error(&e.to_string())?;
                            continue;
                        }
                    };
                    if let Err(e) = client.send(&data).await {
                        writer.write_error(&e.to_string())?;
                    }
                }
                Ok(None) => break,
                Err(e) => return Err(LinkError::Io(e)),
            },
        }
    }

    client.close().await
}

async fn execute_server_command(
    args: ServerArgs,
    writer: &Arc<ConsoleWriter>,
    config: &LinkConfig,
) -> LinkResult<()> {
    let mut options = config.server_options();
    let port = args.port.unwrap_or(config.server.port);
    let host = args.bind.unwrap_or_else(|| config.server.bind.clone());
    options = options.with_bind(Endpoint::new(host, port));
    let backlog = args.backlog.unwrap_or(config.server.backlog);

    let server = TcpServer::with_options(options);
    print_events(server.events(), writer);

    let local = server.start(backlog).await?;
    writer.write_message(&format!("Listening on {}", local))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let data = match parse_data(&line, args.format) {
                        Ok(data) => data,
                        Err(e) => {
                            writer.write_error(&e.to_string())?;
                            continue;
                        }
                    };
                    let report = server.send_to_all(&data).await;
                    if report.failed > 0 {
                        writer.write_error(&format!(
                            "Broadcast failed for {} of {} connections",
                            report.failed, report.targets
                        ))?;
                    }
                }
                Ok(None) => {
                    debug!("stdin closed, serving until interrupted");
                    stdin_open = false;
                }
                Err(e) => return Err(LinkError::Io(e)),
            },
        }
    }

    let connections = server.connections();
    let stats = server.stats();
    server.close().await?;
    writer.write_connections(&connections)?;
    writer.write_stats(&stats)?;
    Ok(())
}

async fn execute_send_command(
    args: SendArgs,
    writer: &Arc<ConsoleWriter>,
    config: &LinkConfig,
) -> LinkResult<()> {
    let data = parse_data(&args.data, args.format)?;

    let mut options = config.client_options();
    options.endpoint = Endpoint::new(args.host, args.port);

    let client = TcpClient::with_options(options);
    print_events(client.events(), writer);
    let mut closed_rx = closed_signal(client.events());

    client.start().await?;
    client.send(&data).await?;

    if args.wait > 0 {
        let _ = tokio::time::timeout(
            Duration::from_millis(args.wait),
            closed_rx.wait_for(|closed| *closed),
        )
        .await;
    }

    client.close().await
}

fn execute_config_command(
    args: ConfigArgs,
    writer: &ConsoleWriter,
    config: &LinkConfig,
    config_manager: &ConfigManager,
    explicit: &Option<String>,
) -> LinkResult<()> {
    match args.command {
        ConfigCommand::Show => {
            writer.write_config(config)?;
            Ok(())
        }
        ConfigCommand::Validate { file } => {
            let target = file.or_else(|| explicit.clone());
            let result = match &target {
                Some(config_path) => config_manager.load_config_from_path(config_path.as_ref()),
                None => config_manager.load_config(),
            };
            match (result, target) {
                (Ok(_), Some(path)) => {
                    writer.write_message(&format!("Configuration file '{}' is valid", path))?
                }
                (Ok(_), None) => writer.write_message("Current configuration is valid")?,
                (Err(e), _) => {
                    writer.write_error(&format!("Configuration validation failed: {}", e))?;
                    return Err(e);
                }
            }
            Ok(())
        }
        ConfigCommand::Init { file, global } => {
            if global {
                let global_path = config_manager.global_config_path();
                if global_path.exists() {
                    return Err(LinkError::Config {
                        message: format!(
                            "Global configuration already exists at '{}'",
                            global_path.display()
                        ),
                    });
                }
                config_manager.save_config(&LinkConfig::default())?;
                writer.write_message(&format!(
                    "Global configuration initialized at '{}'",
                    global_path.display()
                ))?;
            } else {
                let dir = match file {
                    Some(dir) => PathBuf::from(dir),
                    None => std::env::current_dir().map_err(|e| LinkError::Config {
                        message: format!("Failed to get current directory: {}", e),
                    })?,
                };
                let created = config_manager.init_project_config(&dir)?;
                writer.write_message(&format!(
                    "Project configuration initialized at '{}'",
                    created.display()
                ))?;
            }
            Ok(())
        }
        ConfigCommand::Path => {
            writer.write_message(&format!(
                "Global: {}",
                config_manager.global_config_path().display()
            ))?;
            match config_manager.project_config_path() {
                Some(path) => writer.write_message(&format!("Project: {}", path.display()))?,
                None => writer.write_message("Project: (none)")?,
            }
            Ok(())
        }
    }
}

/// Print every event an engine raises.
fn print_events(dispatcher: &EventDispatcher, writer: &Arc<ConsoleWriter>) {
    for kind in EventKind::ALL {
        let writer = Arc::clone(writer);
        dispatcher.subscribe(kind, move |event| {
            if let Err(e) = writer.write_event(event) {
                warn!("Failed to print event: {}", e);
            }
        });
    }
}

/// Flag raised once the engine reports its connection closed.
fn closed_signal(dispatcher: &EventDispatcher) -> watch::Receiver<bool> {
    let (closed_tx, closed_rx) = watch::channel(false);
    dispatcher.on_connection_closed(move |_| {
        closed_tx.send_replace(true);
    });
    closed_rx
}

/// Decode user input in the given format.
pub fn parse_data(data: &str, format: DataFormat) -> LinkResult<Vec<u8>> {
    match format {
        DataFormat::Text => Ok(data.as_bytes().to_vec()),
        DataFormat::Hex => {
            let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
            hex::decode(&cleaned)
                .map_err(|e| LinkError::InvalidInput(format!("Invalid hex data: {}", e)))
        }
        DataFormat::Base64 => base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|e| LinkError::InvalidInput(format!("Invalid base64 data: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text() {
        assert_eq!(parse_data("hello", DataFormat::Text).unwrap(), b"hello");
    }

    #[test]
    fn test_parse_hex_ignores_whitespace() {
        assert_eq!(
            parse_data("de ad\nbe ef", DataFormat::Hex).unwrap(),
            vec![0xde, 0xad, 0xbe, 0xef]
        );
        assert!(matches!(
            parse_data("xyz", DataFormat::Hex),
            Err(LinkError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_parse_base64() {
        assert_eq!(parse_data("aGVsbG8=", DataFormat::Base64).unwrap(), b"hello");
        assert!(parse_data("***", DataFormat::Base64).is_err());
    }

    #[tokio::test]
    async fn test_closed_signal_fires_on_close() {
        let dispatcher = EventDispatcher::new();
        let mut closed_rx = closed_signal(&dispatcher);
        assert!(!*closed_rx.borrow());

        dispatcher.publish(&crate::core::Event::lifecycle(
            EventKind::ConnectionClosed,
            crate::core::EventSource {
                engine: crate::core::EngineId(1),
                role: crate::core::EngineRole::Client,
            },
            Endpoint::new("127.0.0.1", 1),
            None,
        ));

        closed_rx.wait_for(|closed| *closed).await.unwrap();
    }
}
