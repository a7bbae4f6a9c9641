//! Transport endpoints and the well-known naming scheme.
//!
//! The server core drives a single `Endpoint` surface; the transport
//! behind it differs per platform (a Unix domain socket, or a named pipe
//! on Windows). Both adapters expose the same non-blocking operations:
//! `accept_nb`/`read_nb`/`write_nb` never block the worker for more than
//! the bounded [`IO_SLICE`] readiness wait, and repeated client
//! connect/disconnect cycles never require a re-bind.

use std::time::Duration;
use thiserror::Error;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::Endpoint;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::Endpoint;

/// Longest time a single transact step may spend waiting for the
/// transport to become ready.
pub(crate) const IO_SLICE: Duration = Duration::from_millis(20);

/// Prefix for every well-known endpoint name this crate creates.
pub const NAME_PREFIX: &str = "tether";

/// Errors that can abort server startup. Everything after a successful
/// bind is recovered internally.
#[derive(Debug, Error)]
pub enum StartError {
    /// Another live server already owns the requested name.
    #[error("endpoint name is already bound by a live server")]
    AlreadyBound,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outcome of a non-blocking accept.
#[derive(Debug, PartialEq, Eq)]
pub enum Accepted {
    Connected,
    WouldBlock,
}

/// Outcome of a non-blocking read.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n > 0` bytes were appended to the caller's buffer.
    Got(usize),
    WouldBlock,
    PeerClosed,
}

/// Outcome of a non-blocking write.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// `n > 0` bytes were accepted by the transport; may be short.
    Sent(usize),
    WouldBlock,
    PeerClosed,
}

/// The deterministic identifier peers use to find a server.
///
/// The suffix is normally derived from the target process id; the
/// transport-specific prefix (a hidden file under `/tmp` on Unix, the
/// pipe namespace on Windows) is prepended by the adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointName {
    suffix: String,
}

impl EndpointName {
    /// Well-known name for the given process id.
    pub fn for_pid(pid: u32) -> Self {
        Self { suffix: format!("{NAME_PREFIX}-{pid}") }
    }

    /// Name with a caller-chosen suffix, for embedders that manage their
    /// own identifier scheme.
    pub fn from_suffix(suffix: impl Into<String>) -> Self {
        Self { suffix: suffix.into() }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Full transport address a client should connect to: a filesystem
    /// path on Unix, a pipe path on Windows.
    pub fn address(&self) -> String {
        #[cfg(unix)]
        {
            format!("/tmp/.{}", self.suffix)
        }
        #[cfg(windows)]
        {
            format!(r"\\.\pipe\{}", self.suffix)
        }
    }
}

impl std::fmt::Display for EndpointName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.address())
    }
}

/// Is a server already listening for `pid`?
///
/// Injection tooling uses this to avoid attaching to a process twice. On
/// Unix the well-known socket is probed with a connect, so a stale file
/// left by a crashed process does not count as a live server. On Windows
/// the pipe namespace only holds names with an owner, so presence of the
/// name is sufficient.
pub fn server_exists(pid: u32) -> bool {
    let name = EndpointName::for_pid(pid);
    #[cfg(unix)]
    {
        std::os::unix::net::UnixStream::connect(name.address()).is_ok()
    }
    #[cfg(windows)]
    {
        std::fs::metadata(name.address()).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_deterministic() {
        assert_eq!(EndpointName::for_pid(4711), EndpointName::for_pid(4711));
        assert_eq!(EndpointName::for_pid(4711).suffix(), "tether-4711");
        assert_ne!(
            EndpointName::for_pid(1).address(),
            EndpointName::for_pid(2).address()
        );
    }

    #[cfg(unix)]
    #[test]
    fn unix_address_is_a_hidden_tmp_path() {
        assert_eq!(EndpointName::for_pid(99).address(), "/tmp/.tether-99");
    }
}
