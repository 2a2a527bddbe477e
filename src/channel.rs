//! Duplex message channel seam.
//!
//! The transport (accepting connections, framing messages) is an external
//! collaborator; the session only needs a sink for outbound text frames and
//! a stream of inbound ones. The WebSocket implementation lives here; tests
//! substitute in-memory halves.

use crate::errors::BridgeError;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tracing::debug;

/// Write half of a channel. The session funnels every outbound message
/// through a single task, so implementations are never called concurrently;
/// each frame is delivered whole or not at all.
#[async_trait]
pub trait MessageSink: Send {
    async fn send(&mut self, text: String) -> Result<(), BridgeError>;

    /// Close the channel towards the peer.
    async fn close(&mut self);
}

/// Read half of a channel.
#[async_trait]
pub trait MessageStream: Send {
    /// Next inbound text frame; `None` once the peer has closed or the
    /// transport failed.
    async fn next_message(&mut self) -> Option<String>;
}

/// A bidirectional, message-oriented connection to a remote peer.
pub trait DuplexChannel: Send {
    fn split(self) -> (Box<dyn MessageSink>, Box<dyn MessageStream>);
}

/// WebSocket-backed channel.
pub struct WebSocketChannel {
    socket: WebSocket,
}

impl WebSocketChannel {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl DuplexChannel for WebSocketChannel {
    fn split(self) -> (Box<dyn MessageSink>, Box<dyn MessageStream>) {
        let (sink, stream) = self.socket.split();
        (Box::new(WsSink { sink }), Box::new(WsStream { stream }))
    }
}

struct WsSink {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl MessageSink for WsSink {
    async fn send(&mut self, text: String) -> Result<(), BridgeError> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| BridgeError::ChannelClosed)
    }

    async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}

struct WsStream {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl MessageStream for WsStream {
    async fn next_message(&mut self) -> Option<String> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(text.to_string()),
                Ok(Message::Binary(data)) => {
                    return Some(String::from_utf8_lossy(&data).into_owned());
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(err) => {
                    debug!(error = %err, "WebSocket receive error");
                    return None;
                }
            }
        }
        None
    }
}
