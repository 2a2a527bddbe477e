//! PTY-backed shell process.

use crate::errors::BridgeError;
use parking_lot::{Mutex, RwLock};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write as IoWrite};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const PTY_READ_BUFFER_SIZE: usize = 4096;
const PTY_INPUT_CHANNEL_SIZE: usize = 1024;
const PTY_WRITE_CHUNK_SIZE: usize = 512;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Blocking reader over the master side. Cloned from the master at spawn
/// time, so it stays usable (returning EOF) after the master handle itself
/// has been released.
pub type PtyReader = Box<dyn Read + Send>;

/// State that requires mutex protection: `resize` and `terminate` both need
/// the master, and `terminate` must not race a concurrent resize.
struct PtyProcessInner {
    master: Option<Box<dyn MasterPty + Send>>,
    child: Box<dyn Child + Send>,
}

/// A shell process attached to the slave side of a pseudo-terminal pair.
///
/// At most one live child per instance. The master handle is released
/// exactly once, by `terminate`, after the child has been reaped.
pub struct PtyProcess {
    inner: Mutex<PtyProcessInner>,
    /// Input queue drained by the dedicated writer thread.
    input_tx: SyncSender<Vec<u8>>,
    /// Last window size applied (rows, cols).
    size: RwLock<(u16, u16)>,
    terminated: AtomicBool,
    pid: u32,
}

impl PtyProcess {
    /// Allocate a PTY pair and spawn `shell` (or the host default) attached
    /// to the slave side as its controlling terminal. Returns the process
    /// handle plus an independent blocking reader for the master side.
    pub fn spawn(
        shell: Option<&str>,
        rows: u16,
        cols: u16,
    ) -> Result<(Self, PtyReader), BridgeError> {
        let shell = shell.map(str::to_string).unwrap_or_else(default_shell);

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| BridgeError::Spawn(format!("openpty failed: {e}")))?;

        let mut cmd = CommandBuilder::new(&shell);
        cmd.env(
            "TERM",
            std::env::var("TERM").unwrap_or_else(|_| "xterm-256color".to_string()),
        );
        cmd.env("SHELL", &shell);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| BridgeError::Spawn(format!("exec {shell} failed: {e}")))?;
        // The parent must not hold the slave side open: the reader only sees
        // EOF on child exit once every slave handle is closed.
        drop(pair.slave);

        let pid = child.process_id().unwrap_or(0);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| BridgeError::Spawn(format!("clone PTY reader failed: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| BridgeError::Spawn(format!("take PTY writer failed: {e}")))?;

        let (input_tx, input_rx) = std::sync::mpsc::sync_channel(PTY_INPUT_CHANNEL_SIZE);
        spawn_pty_writer_thread(pid, writer, input_rx);

        info!(pid, shell = %shell, "[pty] Shell process spawned");

        Ok((
            Self {
                inner: Mutex::new(PtyProcessInner {
                    master: Some(pair.master),
                    child,
                }),
                input_tx,
                size: RwLock::new((rows, cols)),
                terminated: AtomicBool::new(false),
                pid,
            },
            reader,
        ))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the child is still running.
    pub fn is_alive(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.child.try_wait().ok().flatten().is_none()
    }

    /// Queue bytes for the shell's stdin. Fails only once the writer thread
    /// has shut down (master invalid, process exited); the caller logs and
    /// carries on.
    pub fn write(&self, bytes: &[u8]) -> Result<(), BridgeError> {
        self.input_tx
            .send(bytes.to_vec())
            .map_err(|_| BridgeError::ProcessGone)
    }

    /// Update the kernel-level window size. A no-op, not an error, once the
    /// child has exited.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), BridgeError> {
        let mut inner = self.inner.lock();
        if inner.child.try_wait().ok().flatten().is_some() {
            debug!(pid = self.pid, "[pty] Resize after exit ignored");
            return Ok(());
        }
        let Some(master) = inner.master.as_ref() else {
            return Ok(());
        };
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| {
                BridgeError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    e.to_string(),
                ))
            })?;
        *self.size.write() = (rows, cols);
        Ok(())
    }

    /// Last size applied via `resize` (or the spawn size).
    pub fn size(&self) -> (u16, u16) {
        *self.size.read()
    }

    /// Whether `terminate` has run.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Best-effort stop and reap of the child. Idempotent: only the first
    /// call does any work. Waits up to `grace` for a natural exit before
    /// killing, then reaps and releases the master handle.
    ///
    /// Blocks for up to `grace`; call from a blocking-capable context.
    pub fn terminate(&self, grace: Duration) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut inner = self.inner.lock();

        let deadline = Instant::now() + grace;
        let mut exited = false;
        loop {
            match inner.child.try_wait() {
                Ok(Some(status)) => {
                    debug!(pid = self.pid, ?status, "[pty] Shell exited on its own");
                    exited = true;
                    break;
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    std::thread::sleep(EXIT_POLL_INTERVAL);
                }
                Err(err) => {
                    warn!(pid = self.pid, error = %err, "[pty] Wait probe failed");
                    break;
                }
            }
        }

        if !exited {
            if let Err(err) = inner.child.kill() {
                warn!(pid = self.pid, error = %err, "[pty] Failed to kill shell process");
            }
            if let Err(err) = inner.child.wait() {
                warn!(pid = self.pid, error = %err, "[pty] Failed to reap shell process");
            }
        }

        // Child is reaped or confirmed dead; the master is released here and
        // nowhere else.
        inner.master.take();
        info!(pid = self.pid, "[pty] Shell process terminated");
    }
}

/// Drains the input queue onto the PTY in small chunks. Exits when the queue
/// closes or the master stops accepting writes.
fn spawn_pty_writer_thread(pid: u32, mut writer: Box<dyn IoWrite + Send>, input_rx: Receiver<Vec<u8>>) {
    std::thread::spawn(move || {
        while let Ok(data) = input_rx.recv() {
            for chunk in data.chunks(PTY_WRITE_CHUNK_SIZE) {
                if let Err(err) = writer.write_all(chunk).and_then(|_| writer.flush()) {
                    error!(pid, error = %err, "[writer] PTY write failed, stopping");
                    return;
                }
            }
        }
        debug!(pid, "[writer] Input queue closed, writer thread exiting");
    });
}

/// Length of the longest prefix of `bytes` that can be decoded without
/// tearing a trailing multi-byte sequence. A genuinely invalid sequence is
/// passed through whole for the lossy decoder to replace.
pub fn find_utf8_boundary(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Ok(_) => bytes.len(),
        // error_len() == None means the buffer ends mid-sequence; hold the
        // tail back for the next read.
        Err(err) if err.error_len().is_none() => err.valid_up_to(),
        Err(_) => bytes.len(),
    }
}

fn default_shell() -> String {
    if let Ok(shell) = std::env::var("SHELL") {
        if !shell.is_empty() && Path::new(&shell).exists() {
            return shell;
        }
    }

    for candidate in ["/bin/bash", "/usr/bin/bash", "/bin/sh"] {
        if Path::new(candidate).exists() {
            return candidate.to_string();
        }
    }

    "/bin/sh".to_string()
}
