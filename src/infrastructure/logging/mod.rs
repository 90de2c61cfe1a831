// Logging module - Logging infrastructure
use crate::domain::error::{LinkError, LinkResult};
use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging system
///
/// `RUST_LOG` wins when set. Otherwise the filter is `tcplink=<level>`, raised
/// to `debug` when `verbose` is on. Fails if a global subscriber is already
/// installed.
pub fn init_logging(level: &str, verbose: bool) -> LinkResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(level, verbose)))
        .map_err(|e| LinkError::Config {
            message: format!("Invalid log filter: {}", e),
        })?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_level(true)
                .with_thread_ids(verbose)
                .with_file(verbose)
                .with_line_number(verbose),
        )
        .try_init()
        .map_err(|e| LinkError::Config {
            message: format!("Failed to initialize logging: {}", e),
        })?;

    tracing::debug!("TcpLink logging system initialized");
    Ok(())
}

fn default_directive(level: &str, verbose: bool) -> String {
    let level = if verbose { "debug" } else { level };
    format!("tcplink={},warn", level)
}
