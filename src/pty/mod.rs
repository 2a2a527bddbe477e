//! PTY process management.
//!
//! Owns the pseudo-terminal pair and the shell child attached to its slave
//! side. Reads happen on an independent cloned handle so they can block on a
//! dedicated context without stalling the rest of the session.

mod process;

pub use process::{find_utf8_boundary, PtyProcess, PtyReader, PTY_READ_BUFFER_SIZE};
