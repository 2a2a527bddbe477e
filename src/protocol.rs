//! Wire protocol for the bridge channel.
//!
//! Messages are JSON objects with a required `type` discriminator. Inbound
//! and outbound message sets are disjoint closed unions. An unrecognized tag
//! or a missing required field is a non-fatal decode outcome, never a
//! propagated fault; the protocol has no negotiated version, so peers may
//! legitimately send frames we do not understand.

use crate::telemetry::TelemetrySnapshot;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Messages accepted from the remote peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Raw keystrokes destined for the shell's stdin.
    Input { data: String },

    /// Terminal window size change.
    Resize { rows: u16, cols: u16 },

    /// A full command line, injected as if typed followed by a newline.
    /// Same semantics as `Input`, kept separate for caller convenience.
    Exec { cmd: String },
}

/// Messages emitted to the remote peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Shell output, decoded leniently from the raw PTY byte stream.
    Output { data: String },

    /// Host resource snapshot.
    Telemetry {
        cpu: f32,
        ram: f32,
        net_sent: u64,
        net_recv: u64,
    },
}

impl ClientMessage {
    /// Lenient decode: unknown tags, missing fields and non-JSON frames all
    /// yield `None`. Extra fields are ignored.
    pub fn decode(raw: &str) -> Option<Self> {
        match serde_json::from_str(raw) {
            Ok(message) => Some(message),
            Err(err) => {
                debug!(error = %err, "Ignoring undecodable inbound frame");
                None
            }
        }
    }
}

impl ServerMessage {
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<TelemetrySnapshot> for ServerMessage {
    fn from(snapshot: TelemetrySnapshot) -> Self {
        ServerMessage::Telemetry {
            cpu: snapshot.cpu,
            ram: snapshot.ram,
            net_sent: snapshot.net_sent,
            net_recv: snapshot.net_recv,
        }
    }
}
