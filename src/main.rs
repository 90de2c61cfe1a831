// TcpLink - Event-driven TCP client and server
use clap::Parser;
use tcplink::cli::args::Args;
use tcplink::cli::commands::execute_command;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    execute_command(args).await?;
    Ok(())
}
