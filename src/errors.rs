use thiserror::Error;

/// Errors surfaced by the bridge core.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The shell process could not be started. Fatal to session start; the
    /// session never becomes active.
    #[error("failed to spawn shell process: {0}")]
    Spawn(String),

    /// The PTY master is no longer writable (the process exited). One write
    /// was dropped; the session continues.
    #[error("shell process is gone, input dropped")]
    ProcessGone,

    /// A terminal device error distinct from normal process exit.
    #[error("terminal I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The outbound channel rejected a message; the peer is unreachable.
    #[error("channel closed by peer")]
    ChannelClosed,
}
