//! termbridge: interactive terminal-session bridge.
//!
//! This crate provides:
//! - `PtyProcess`: a pseudo-terminal pair with a shell process attached to
//!   its slave side
//! - `TerminalSession`: bridges one shell process to one duplex message
//!   channel, interleaving a periodic host-telemetry stream
//! - `DuplexChannel`: the seam towards the transport layer, implemented
//!   here for WebSockets
//! - `build_router`: the thin server that spawns one session per connection

pub mod channel;
pub mod errors;
pub mod protocol;
pub mod pty;
pub mod server;
pub mod session;
pub mod telemetry;

pub use channel::{DuplexChannel, MessageSink, MessageStream, WebSocketChannel};
pub use errors::BridgeError;
pub use protocol::{ClientMessage, ServerMessage};
pub use pty::PtyProcess;
pub use session::{SessionConfig, SessionState, TerminalSession};
pub use telemetry::{TelemetrySampler, TelemetrySnapshot};
