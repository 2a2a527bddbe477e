//! WebSocket session server.
//!
//! Accepts connections and hands each upgraded socket to one
//! `TerminalSession`; everything interesting happens in `session`.

use crate::channel::WebSocketChannel;
use crate::session::{SessionConfig, TerminalSession};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::{any, get};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    config: Arc<SessionConfig>,
}

impl AppState {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

/// Health check endpoint response.
#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn session_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let mut session = TerminalSession::new((*state.config).clone());
        info!(session = %session.id(), "[server] Connection accepted");
        if let Err(err) = session.run(WebSocketChannel::new(socket)).await {
            warn!(session = %session.id(), error = %err, "[server] Session ended with error");
        }
    })
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", any(session_ws))
        .with_state(state)
}
