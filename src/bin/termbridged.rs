//! termbridged binary entry point.
//!
//! Serves one PTY-backed terminal session per WebSocket connection.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use termbridge::server::{build_router, AppState};
use termbridge::session::SessionConfig;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// Terminal session bridge server.
#[derive(Parser, Debug)]
#[command(name = "termbridged")]
#[command(about = "Bridges PTY-backed shells to WebSocket peers")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Shell to spawn (defaults to the host's configured shell)
    #[arg(long, env = "BRIDGE_SHELL")]
    shell: Option<String>,

    /// Seconds between telemetry snapshots
    #[arg(long, env = "BRIDGE_TELEMETRY_SECS", default_value = "2")]
    telemetry_secs: u64,

    /// Milliseconds to wait for a natural shell exit before killing
    #[arg(long, env = "BRIDGE_GRACE_MS", default_value = "500")]
    grace_ms: u64,

    /// Initial terminal rows
    #[arg(long, default_value = "24")]
    rows: u16,

    /// Initial terminal columns
    #[arg(long, default_value = "80")]
    cols: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::default().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::default().add_directive(Level::INFO.into()))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = SessionConfig {
        shell: args.shell,
        rows: args.rows,
        cols: args.cols,
        telemetry_interval: Duration::from_secs(args.telemetry_secs),
        terminate_grace: Duration::from_millis(args.grace_ms),
    };

    info!(
        bind = %args.bind,
        shell = ?config.shell,
        telemetry_secs = args.telemetry_secs,
        "Starting termbridged"
    );

    let app = build_router(AppState::new(config));
    let listener = TcpListener::bind(args.bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
