// CLI module - Command line interface
pub mod args;
pub mod commands;
pub mod output;

pub use args::{Args, Command, DataFormat, OutputFormat};
pub use commands::{execute_command, parse_data};
pub use output::{render_payload, ConsoleWriter, OutputWriter};
