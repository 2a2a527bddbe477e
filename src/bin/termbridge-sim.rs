//! termbridge-sim binary entry point.
//!
//! A stand-in peer for demos and protocol testing: it speaks the same wire
//! protocol as termbridged but answers each command with a canned execution
//! transcript instead of driving a real shell. No PTY, no telemetry.

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use clap::Parser;
use termbridge::protocol::{ClientMessage, ServerMessage};
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// Simulated bridge peer.
#[derive(Parser, Debug)]
#[command(name = "termbridge-sim")]
#[command(about = "Simulated bridge peer that echoes command execution")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

async fn sim_ws(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(handle_sim_socket)
}

async fn handle_sim_socket(mut socket: WebSocket) {
    info!("[sim] Client connected");

    let banner = [
        "--- termbridge simulator active ---",
        "\n[READY] Enter commands to simulate execution.\n",
    ];
    for line in banner {
        if socket.send(Message::Text(line.into())).await.is_err() {
            return;
        }
    }

    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        let command = match ClientMessage::decode(&text) {
            Some(ClientMessage::Input { data }) => data,
            Some(ClientMessage::Exec { cmd }) => cmd,
            _ => continue,
        };
        let command = command.trim();
        if command.is_empty() {
            continue;
        }

        info!(command = %command, "[sim] Received input");
        let reply = ServerMessage::Output {
            data: format!("\r\n[EXECUTING] {command}\r\nResult: SUCCESS\r\n# "),
        };
        if socket.send(Message::Text(reply.encode().into())).await.is_err() {
            break;
        }
    }

    info!("[sim] Client disconnected");
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

    let app = Router::new().route("/ws", any(sim_ws));

    info!(bind = %args.bind, "Starting termbridge-sim");
    let listener = TcpListener::bind(args.bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
