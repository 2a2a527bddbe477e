//! End-to-end session scenarios: a real shell on one side, an in-memory
//! channel standing in for the transport on the other.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use termbridge::channel::{DuplexChannel, MessageSink, MessageStream};
use termbridge::errors::BridgeError;
use termbridge::session::{SessionConfig, SessionState, TerminalSession};
use tokio::sync::mpsc;

/// Channel half handed to the session.
struct TestChannel {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

/// Channel half kept by the test, playing the remote peer.
struct Peer {
    inbound_tx: Option<mpsc::UnboundedSender<String>>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl Peer {
    fn send_json(&self, value: serde_json::Value) {
        self.send_raw(value.to_string());
    }

    fn send_raw(&self, frame: String) {
        self.inbound_tx
            .as_ref()
            .expect("peer already closed")
            .send(frame)
            .expect("session dropped its inbound stream");
    }

    /// Close the channel from the peer side.
    fn close(&mut self) {
        self.inbound_tx.take();
    }

    /// Read outbound frames until one `output` message contains `needle`.
    async fn expect_output_containing(&mut self, needle: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .unwrap_or_else(|| panic!("no output containing {needle:?} within deadline"));
            let frame = tokio::time::timeout(remaining, self.outbound_rx.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for output containing {needle:?}"))
                .expect("channel ended before expected output");
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&frame) else {
                // Banner frames are plain text.
                continue;
            };
            if value["type"] == "output"
                && value["data"].as_str().is_some_and(|data| data.contains(needle))
            {
                return;
            }
        }
    }
}

fn test_channel() -> (TestChannel, Peer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    (
        TestChannel {
            outbound_tx,
            inbound_rx,
            closed: closed.clone(),
        },
        Peer {
            inbound_tx: Some(inbound_tx),
            outbound_rx,
            closed,
        },
    )
}

struct TestSink {
    tx: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl MessageSink for TestSink {
    async fn send(&mut self, text: String) -> Result<(), BridgeError> {
        self.tx.send(text).map_err(|_| BridgeError::ChannelClosed)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct TestStream {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl MessageStream for TestStream {
    async fn next_message(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl DuplexChannel for TestChannel {
    fn split(self) -> (Box<dyn MessageSink>, Box<dyn MessageStream>) {
        (
            Box::new(TestSink {
                tx: self.outbound_tx,
                closed: self.closed,
            }),
            Box::new(TestStream {
                rx: self.inbound_rx,
            }),
        )
    }
}

fn sh_config() -> SessionConfig {
    SessionConfig {
        shell: Some("/bin/sh".to_string()),
        // Long interval keeps telemetry out of the way unless a test wants it.
        telemetry_interval: Duration::from_secs(60),
        terminate_grace: Duration::from_millis(200),
        ..Default::default()
    }
}

fn spawn_session(
    config: SessionConfig,
    channel: TestChannel,
) -> tokio::task::JoinHandle<(TerminalSession, Result<(), BridgeError>)> {
    tokio::spawn(async move {
        let mut session = TerminalSession::new(config);
        let result = session.run(channel).await;
        (session, result)
    })
}

async fn join_session(
    handle: tokio::task::JoinHandle<(TerminalSession, Result<(), BridgeError>)>,
) -> (TerminalSession, Result<(), BridgeError>) {
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("session did not shut down in time")
        .expect("session task panicked")
}

#[tokio::test]
async fn exec_produces_shell_output() {
    let (channel, mut peer) = test_channel();
    let handle = spawn_session(sh_config(), channel);

    peer.send_json(serde_json::json!({"type": "exec", "cmd": "echo hello"}));
    peer.expect_output_containing("hello").await;

    peer.close();
    let (session, result) = join_session(handle).await;
    assert!(result.is_ok());
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn input_bytes_keep_order_across_messages() {
    let (channel, mut peer) = test_channel();
    let handle = spawn_session(sh_config(), channel);

    // One command line split across two input frames; the shell only sees
    // "ordered" if the bytes arrive intact and in order.
    peer.send_json(serde_json::json!({"type": "input", "data": "echo or"}));
    peer.send_json(serde_json::json!({"type": "input", "data": "dered\n"}));
    peer.expect_output_containing("ordered").await;

    peer.close();
    join_session(handle).await;
}

#[tokio::test]
async fn banner_precedes_structured_traffic() {
    let (channel, mut peer) = test_channel();
    let handle = spawn_session(sh_config(), channel);

    let first = peer.outbound_rx.recv().await.expect("no banner frame");
    assert!(first.contains("termbridge session"));
    let second = peer.outbound_rx.recv().await.expect("no ready frame");
    assert!(second.contains("[READY]"));

    peer.close();
    join_session(handle).await;
}

#[tokio::test]
async fn last_resize_wins() {
    let (channel, mut peer) = test_channel();
    let handle = spawn_session(sh_config(), channel);

    peer.send_json(serde_json::json!({"type": "resize", "rows": 40, "cols": 120}));
    peer.send_json(serde_json::json!({"type": "resize", "rows": 24, "cols": 80}));
    // A round-trip proves both resizes were dispatched before we look.
    peer.send_json(serde_json::json!({"type": "exec", "cmd": "echo done"}));
    peer.expect_output_containing("done").await;

    peer.close();
    let (session, _) = join_session(handle).await;
    assert_eq!(session.window_size(), Some((24, 80)));
}

#[tokio::test]
async fn malformed_frames_leave_session_running() {
    let (channel, mut peer) = test_channel();
    let handle = spawn_session(sh_config(), channel);

    peer.send_raw("this is not json".to_string());
    peer.send_json(serde_json::json!({"type": "selfdestruct"}));
    peer.send_json(serde_json::json!({"type": "resize", "rows": 10}));
    peer.send_json(serde_json::json!({"type": "exec", "cmd": "echo still alive"}));
    peer.expect_output_containing("still alive").await;

    peer.close();
    let (session, result) = join_session(handle).await;
    assert!(result.is_ok());
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn peer_close_terminates_process_and_closes_channel() {
    let (channel, mut peer) = test_channel();
    let handle = spawn_session(sh_config(), channel);

    peer.close();
    let (session, result) = join_session(handle).await;
    assert!(result.is_ok());
    assert_eq!(session.state(), SessionState::Closed);
    assert!(session.process_terminated());
    assert!(peer.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn shell_exit_closes_session_without_further_input() {
    let (channel, peer) = test_channel();
    let handle = spawn_session(sh_config(), channel);

    peer.send_json(serde_json::json!({"type": "exec", "cmd": "exit"}));

    // The peer stays connected; teardown must come from the shell side.
    let (session, result) = join_session(handle).await;
    assert!(result.is_ok());
    assert_eq!(session.state(), SessionState::Closed);
    assert!(session.process_terminated());
    assert!(peer.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn spawn_failure_never_activates_session() {
    let config = SessionConfig {
        shell: Some("/no/such/shell".to_string()),
        ..sh_config()
    };
    let (channel, mut peer) = test_channel();

    let mut session = TerminalSession::new(config);
    let result = session.run(channel).await;
    assert!(matches!(result, Err(BridgeError::Spawn(_))));
    assert_eq!(session.state(), SessionState::Closed);

    let notice = peer.outbound_rx.recv().await.expect("no failure notice");
    assert!(notice.contains("failed to start"));
    assert!(peer.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn telemetry_flows_at_interval() {
    let config = SessionConfig {
        telemetry_interval: Duration::from_millis(50),
        ..sh_config()
    };
    let (channel, mut peer) = test_channel();
    let handle = spawn_session(config, channel);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let mut seen = 0;
    while seen < 3 && tokio::time::Instant::now() < deadline {
        let Ok(Some(frame)) =
            tokio::time::timeout(Duration::from_secs(10), peer.outbound_rx.recv()).await
        else {
            break;
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&frame) else {
            continue;
        };
        if value["type"] == "telemetry" {
            assert!(value["cpu"].is_number());
            assert!(value["ram"].is_number());
            assert!(value["net_sent"].is_u64());
            assert!(value["net_recv"].is_u64());
            seen += 1;
        }
    }
    assert!(seen >= 3, "expected at least 3 telemetry frames, saw {seen}");

    peer.close();
    join_session(handle).await;
}
