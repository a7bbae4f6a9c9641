//! Windows adapter: a non-blocking server over a named pipe.
//!
//! Named pipes tear the server end down when a client drops, so this
//! adapter re-creates a fresh pipe instance as part of
//! `disconnect_client` (falling back to `rearm` if that creation fails).
//! The first instance is created with `first_pipe_instance`, which is
//! what makes a second server for the same name fail to bind.

use super::{Accepted, EndpointName, IO_SLICE, ReadOutcome, StartError, WriteOutcome};
use bytes::BytesMut;
use std::io::{self, ErrorKind};
use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};
use tracing::debug;

pub struct Endpoint {
    pipe: Option<NamedPipeServer>,
    connected: bool,
    path: String,
}

impl Endpoint {
    /// Bind the well-known name. Must be called from within a tokio
    /// runtime context.
    pub fn bind(name: &EndpointName) -> Result<Self, StartError> {
        let path = name.address();
        let pipe = ServerOptions::new()
            .first_pipe_instance(true)
            .create(&path)
            .map_err(|err| {
                // A second first-instance create on an owned name comes
                // back as an access error.
                if err.kind() == ErrorKind::PermissionDenied {
                    StartError::AlreadyBound
                } else {
                    StartError::Io(err)
                }
            })?;
        debug!(%path, "endpoint bound");

        Ok(Self { pipe: Some(pipe), connected: false, path })
    }

    /// Make sure a pipe instance exists to accept the next client.
    pub fn rearm(&mut self) -> io::Result<()> {
        if self.pipe.is_none() {
            self.pipe = Some(ServerOptions::new().create(&self.path)?);
        }
        Ok(())
    }

    /// Wait up to [`IO_SLICE`] for a client to attach to the pipe.
    pub async fn accept_nb(&mut self) -> io::Result<Accepted> {
        let Some(pipe) = self.pipe.as_ref() else {
            self.rearm()?;
            return Ok(Accepted::WouldBlock);
        };
        match tokio::time::timeout(IO_SLICE, pipe.connect()).await {
            Err(_elapsed) => Ok(Accepted::WouldBlock),
            Ok(Ok(())) => {
                self.connected = true;
                Ok(Accepted::Connected)
            }
            Ok(Err(err)) if is_transient(&err) => Ok(Accepted::WouldBlock),
            Ok(Err(err)) => Err(err),
        }
    }

    /// Read whatever the client has pending into `buf` without blocking.
    pub fn read_nb(&mut self, buf: &mut BytesMut) -> io::Result<ReadOutcome> {
        let Some(pipe) = self.pipe.as_ref().filter(|_| self.connected) else {
            return Ok(ReadOutcome::WouldBlock);
        };
        match pipe.try_read_buf(buf) {
            Ok(0) => Ok(ReadOutcome::PeerClosed),
            Ok(n) => Ok(ReadOutcome::Got(n)),
            Err(err) if is_transient(&err) => Ok(ReadOutcome::WouldBlock),
            Err(err) if is_disconnect(&err) => Ok(ReadOutcome::PeerClosed),
            Err(err) => Err(err),
        }
    }

    /// Hand `bytes` to the transport without blocking; may accept a short
    /// count on a full pipe buffer.
    pub fn write_nb(&mut self, bytes: &[u8]) -> io::Result<WriteOutcome> {
        let Some(pipe) = self.pipe.as_ref().filter(|_| self.connected) else {
            return Ok(WriteOutcome::WouldBlock);
        };
        match pipe.try_write(bytes) {
            Ok(0) => Ok(WriteOutcome::PeerClosed),
            Ok(n) => Ok(WriteOutcome::Sent(n)),
            Err(err) if is_transient(&err) => Ok(WriteOutcome::WouldBlock),
            Err(err) if is_disconnect(&err) => Ok(WriteOutcome::PeerClosed),
            Err(err) => Err(err),
        }
    }

    /// Drop the current client and stand up a fresh instance so the next
    /// `accept_nb` can succeed.
    pub fn disconnect_client(&mut self) {
        if let Some(pipe) = self.pipe.take() {
            let _ = pipe.disconnect();
        }
        self.connected = false;
        // On failure the next rearm/accept retries the creation.
        match ServerOptions::new().create(&self.path) {
            Ok(pipe) => self.pipe = Some(pipe),
            Err(err) => debug!(?err, "pipe re-creation deferred"),
        }
    }

    /// Release the pipe; the name disappears with its last instance.
    pub fn close(&mut self) {
        if let Some(pipe) = self.pipe.take() {
            let _ = pipe.disconnect();
        }
        self.connected = false;
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
