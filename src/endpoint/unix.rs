//! Unix adapter: a non-blocking server over a Unix domain socket bound
//! to the well-known path.
//!
//! The listener stays armed for the lifetime of the endpoint, so client
//! drops need no re-arming here; `disconnect_client` just forgets the
//! stream. Binding reclaims a stale socket file (one nobody answers on)
//! but refuses to displace a live server.

use super::{Accepted, EndpointName, IO_SLICE, ReadOutcome, StartError, WriteOutcome};
use bytes::BytesMut;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use tokio::net::{UnixListener, UnixStream};
use tracing::debug;

pub struct Endpoint {
    listener: UnixListener,
    client: Option<UnixStream>,
    path: PathBuf,
}

impl Endpoint {
    /// Bind the well-known name. Must be called from within a tokio
    /// runtime context.
    pub fn bind(name: &EndpointName) -> Result<Self, StartError> {
        let path = PathBuf::from(name.address());

        if path.exists() {
            if std::os::unix::net::UnixStream::connect(&path).is_ok() {
                return Err(StartError::AlreadyBound);
            }
            // Leftover from a previous instance that is no longer
            // answering; reclaim the name.
            debug!(path = %path.display(), "removing stale endpoint");
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path).map_err(|err| {
            if err.kind() == ErrorKind::AddrInUse {
                StartError::AlreadyBound
            } else {
                StartError::Io(err)
            }
        })?;
        debug!(path = %path.display(), "endpoint bound");

        Ok(Self { listener, client: None, path })
    }

    /// Make sure the endpoint is ready to accept. The Unix listener is
    /// armed from bind onwards, so there is nothing to do.
    pub fn rearm(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Wait up to [`IO_SLICE`] for a pending connection and adopt it.
    pub async fn accept_nb(&mut self) -> io::Result<Accepted> {
        match tokio::time::timeout(IO_SLICE, self.listener.accept()).await {
            Err(_elapsed) => Ok(Accepted::WouldBlock),
            Ok(Ok((stream, _addr))) => {
                self.client = Some(stream);
                Ok(Accepted::Connected)
            }
            Ok(Err(err)) if is_transient(&err) => Ok(Accepted::WouldBlock),
            Ok(Err(err)) => Err(err),
        }
    }

    /// Read whatever the client has pending into `buf` without blocking.
    pub fn read_nb(&mut self, buf: &mut BytesMut) -> io::Result<ReadOutcome> {
        let Some(client) = self.client.as_ref() else {
            return Ok(ReadOutcome::WouldBlock);
        };
        match client.try_read_buf(buf) {
            Ok(0) => Ok(ReadOutcome::PeerClosed),
            Ok(n) => Ok(ReadOutcome::Got(n)),
            Err(err) if is_transient(&err) => Ok(ReadOutcome::WouldBlock),
            Err(err) if is_disconnect(&err) => Ok(ReadOutcome::PeerClosed),
            Err(err) => Err(err),
        }
    }

    /// Hand `bytes` to the transport without blocking; may accept a short
    /// count on a full socket buffer.
    pub fn write_nb(&mut self, bytes: &[u8]) -> io::Result<WriteOutcome> {
        let Some(client) = self.client.as_ref() else {
            return Ok(WriteOutcome::WouldBlock);
        };
        match client.try_write(bytes) {
            Ok(0) => Ok(WriteOutcome::PeerClosed),
            Ok(n) => Ok(WriteOutcome::Sent(n)),
            Err(err) if is_transient(&err) => Ok(WriteOutcome::WouldBlock),
            Err(err) if is_disconnect(&err) => Ok(WriteOutcome::PeerClosed),
            Err(err) => Err(err),
        }
    }

    /// Drop the current client; the listener keeps accepting.
    pub fn disconnect_client(&mut self) {
        self.client = None;
    }

    /// Release the name. The listener itself closes when the endpoint is
    /// dropped.
    pub fn close(&mut self) {
        self.client = None;
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        // Covers forced-cancellation paths where close() never ran.
        let _ = std::fs::remove_file(&self.path);
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
    )
}
