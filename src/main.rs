//! Line Chat Server - Entry Point
//!
//! Parses arguments, starts the server and stops it on Ctrl-C or when a
//! client sends `.shutdown`.

use std::net::IpAddr;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use line_chat::config::{DEFAULT_MAX_LINE_LENGTH, DEFAULT_PORT};
use line_chat::{ChatServer, ServerConfig};

/// Multi-client line-oriented chat server
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value_t = 100)]
    heartbeat_ms: u64,

    /// Longest accepted input line in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_LINE_LENGTH)]
    max_line_length: usize,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig::default()
            .with_host(args.host)
            .with_port(args.port)
            .with_heartbeat_interval(Duration::from_millis(args.heartbeat_ms))
            .with_max_line_length(args.max_line_length)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=line_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("line_chat=info")),
        )
        .init();

    let args = Args::parse();
    let server = ChatServer::new(args.into());
    server.start().await?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => {
                info!("Interrupted");
                // a concurrent `.shutdown` may already be stopping the server
                if let Err(e) = server.stop().await {
                    info!("{}", e);
                }
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        },
        _ = server.stopped() => {}
    }

    server.stopped().await;
    Ok(())
}
