//! Terminal session coordination.
//!
//! One session owns one shell process and one duplex channel, and runs
//! three concurrent activities against them: the inbound dispatch loop, the
//! output relay and the telemetry relay. All outbound traffic is funneled
//! through a single writer task draining a bounded queue, so channel writes
//! never interleave below message granularity and each source's messages
//! keep their emission order.

use crate::channel::{DuplexChannel, MessageSink};
use crate::errors::BridgeError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::pty::{find_utf8_boundary, PtyProcess, PtyReader, PTY_READ_BUFFER_SIZE};
use crate::telemetry::TelemetrySampler;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const OUTBOUND_QUEUE_SIZE: usize = 1024;

/// Session parameters. The defaults mirror the server's CLI defaults.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Shell override; `None` selects the host's configured default shell.
    pub shell: Option<String>,
    /// Initial terminal rows.
    pub rows: u16,
    /// Initial terminal columns.
    pub cols: u16,
    /// Spacing between telemetry snapshots.
    pub telemetry_interval: Duration,
    /// How long `terminate` waits for a natural exit before killing.
    pub terminate_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: None,
            rows: 24,
            cols: 80,
            telemetry_interval: Duration::from_secs(2),
            terminate_grace: Duration::from_millis(500),
        }
    }
}

/// Session lifecycle. `Created` only exists between construction and
/// `run`; teardown always passes through `Closing` before `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Active,
    Closing,
    Closed,
}

/// One shell process bridged to one channel connection.
pub struct TerminalSession {
    id: String,
    config: SessionConfig,
    state: SessionState,
    process: Option<Arc<PtyProcess>>,
}

impl TerminalSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            config,
            state: SessionState::Created,
            process: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Last window size applied to the process, if one was spawned.
    pub fn window_size(&self) -> Option<(u16, u16)> {
        self.process.as_ref().map(|p| p.size())
    }

    /// Whether the process has been terminated and its master released.
    pub fn process_terminated(&self) -> bool {
        self.process.as_ref().is_some_and(|p| p.is_terminated())
    }

    /// Bridge `channel` to a fresh shell process until either side ends:
    /// the peer closing the channel, the shell exiting, or a relay hitting
    /// an unrecoverable error all trigger the same one-shot teardown.
    pub async fn run(&mut self, channel: impl DuplexChannel) -> Result<(), BridgeError> {
        let (mut sink, mut stream) = channel.split();

        let (process, reader) = match PtyProcess::spawn(
            self.config.shell.as_deref(),
            self.config.rows,
            self.config.cols,
        ) {
            Ok(spawned) => spawned,
            Err(err) => {
                warn!(session = %self.id, error = %err, "[session] Shell spawn failed");
                let _ = sink.send(format!("session failed to start: {err}")).await;
                sink.close().await;
                self.state = SessionState::Closed;
                return Err(err);
            }
        };
        let process = Arc::new(process);
        self.process = Some(process.clone());
        self.state = SessionState::Active;
        info!(session = %self.id, pid = process.pid(), "[session] Active");

        // Connection bootstrap: human-readable notice before any structured
        // traffic. A dead peer surfaces through the writer task shortly.
        for line in [
            format!("--- termbridge session {} ---\r\n", self.id),
            "[READY] shell attached\r\n".to_string(),
        ] {
            let _ = sink.send(line).await;
        }

        let (outbound_tx, outbound_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE_SIZE);
        let (halt_tx, mut halt_rx) = mpsc::channel::<&'static str>(2);

        let writer = tokio::spawn(write_loop(sink, outbound_rx));
        let output = tokio::spawn(output_relay(
            self.id.clone(),
            reader,
            outbound_tx.clone(),
            halt_tx.clone(),
        ));
        let telemetry = tokio::spawn(telemetry_relay(
            outbound_tx,
            halt_tx,
            self.config.telemetry_interval,
        ));

        loop {
            tokio::select! {
                inbound = stream.next_message() => match inbound {
                    Some(raw) => self.dispatch(&process, &raw),
                    None => {
                        info!(session = %self.id, "[session] Channel closed by peer");
                        break;
                    }
                },
                reason = halt_rx.recv() => {
                    info!(session = %self.id, reason = reason.unwrap_or("relay gone"), "[session] Halting");
                    break;
                }
            }
        }

        // Closing: stop telemetry, stop consuming inbound, terminate the
        // process (which unblocks the output relay's read), then let the
        // writer drain the queue and close the channel.
        self.state = SessionState::Closing;
        telemetry.abort();
        drop(stream);

        let grace = self.config.terminate_grace;
        let terminating = process.clone();
        let _ = tokio::task::spawn_blocking(move || terminating.terminate(grace)).await;

        let _ = output.await;
        let _ = writer.await;

        self.state = SessionState::Closed;
        info!(session = %self.id, "[session] Closed");
        Ok(())
    }

    /// Apply one inbound frame. Malformed frames and failed writes never
    /// affect session state; the peer may retry.
    fn dispatch(&self, process: &PtyProcess, raw: &str) {
        let Some(message) = ClientMessage::decode(raw) else {
            return;
        };
        match message {
            ClientMessage::Input { data } => {
                if let Err(err) = process.write(data.as_bytes()) {
                    warn!(session = %self.id, error = %err, "[session] Input write failed");
                }
            }
            ClientMessage::Resize { rows, cols } => {
                if let Err(err) = process.resize(rows, cols) {
                    warn!(session = %self.id, error = %err, "[session] Resize failed");
                }
            }
            ClientMessage::Exec { cmd } => {
                let mut line = cmd.into_bytes();
                line.push(b'\n');
                if let Err(err) = process.write(&line) {
                    warn!(session = %self.id, error = %err, "[session] Exec write failed");
                }
            }
        }
    }
}

/// The single serialization point for channel writes: drains the outbound
/// queue, encodes and sends one whole frame per message, then closes the
/// channel once every producer is gone.
async fn write_loop(mut sink: Box<dyn MessageSink>, mut outbound_rx: mpsc::Receiver<ServerMessage>) {
    while let Some(message) = outbound_rx.recv().await {
        if let Err(err) = sink.send(message.encode()).await {
            debug!(error = %err, "[session] Outbound send failed, dropping queue");
            break;
        }
    }
    sink.close().await;
}

/// Relays shell output to the outbound queue. The PTY read blocks, so it
/// runs on the blocking pool, handing the reader and buffer back through
/// each iteration.
async fn output_relay(
    session_id: String,
    mut reader: PtyReader,
    outbound_tx: mpsc::Sender<ServerMessage>,
    halt_tx: mpsc::Sender<&'static str>,
) {
    let mut buf = [0u8; PTY_READ_BUFFER_SIZE];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let read_result = tokio::task::spawn_blocking(move || {
            let result = reader.read(&mut buf);
            (reader, buf, result)
        })
        .await;

        let (returned_reader, returned_buf, result) = match read_result {
            Ok(r) => r,
            Err(err) => {
                warn!(session = %session_id, error = %err, "[reader] Read task panicked");
                break;
            }
        };
        reader = returned_reader;
        buf = returned_buf;

        match result {
            Ok(0) => {
                if !pending.is_empty() {
                    let data = String::from_utf8_lossy(&pending).into_owned();
                    let _ = outbound_tx.send(ServerMessage::Output { data }).await;
                }
                debug!(session = %session_id, "[reader] EOF from shell");
                break;
            }
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                let boundary = find_utf8_boundary(&pending);
                if boundary > 0 {
                    let data = String::from_utf8_lossy(&pending[..boundary]).into_owned();
                    pending.drain(..boundary);
                    if outbound_tx.send(ServerMessage::Output { data }).await.is_err() {
                        break;
                    }
                }
            }
            Err(err) => {
                // Read errors after the child dies are the normal teardown
                // path, not a fault worth more than a debug line.
                debug!(session = %session_id, error = %err, "[reader] Read ended");
                break;
            }
        }
    }

    let _ = halt_tx.try_send("shell output ended");
}

/// Relays periodic host snapshots to the outbound queue. Ticks come from a
/// single stream, so no two telemetry sends ever overlap.
async fn telemetry_relay(
    outbound_tx: mpsc::Sender<ServerMessage>,
    halt_tx: mpsc::Sender<&'static str>,
    interval: Duration,
) {
    let stream = TelemetrySampler::new().stream(interval);
    futures::pin_mut!(stream);
    while let Some(snapshot) = stream.next().await {
        if outbound_tx.send(ServerMessage::from(snapshot)).await.is_err() {
            // Writer gone means the channel is dead; halt the session
            // rather than leaving a silent shell running unobserved.
            let _ = halt_tx.try_send("channel write failed");
            break;
        }
    }
}
