//! The single-client server state machine.
//!
//! One [`ServerMachine::transact`] call performs a single bounded step:
//! a state transition, one read (decoded to exhaustion), or one write
//! attempt. Recoverable trouble (transient I/O, peer disconnects,
//! malformed input) never escapes; it collapses into a transition back
//! towards `Connecting`. The write queue deliberately survives client
//! drops so a reconnecting frontend receives the backlog.

use crate::codec::{self, FrameError};
use crate::endpoint::{Accepted, Endpoint, ReadOutcome, WriteOutcome};
use crate::frame::Frame;
use crate::queue::WriteQueue;
use crate::server::ServerWriter;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, error, info, trace, warn};

/// Initial capacity of the incoming decode buffer.
const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;
/// Minimum spare room guaranteed ahead of every read.
const MIN_READ_CAPACITY: usize = 8 * 1024;

/// What a transact step accomplished. `Busy` asks the worker to come
/// back immediately; `Idle` lets it sleep until the next tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Activity {
    Busy,
    Idle,
}

/// Connection state. Each variant carries exactly the data that state
/// needs; in particular a partially-sent frame lives inside `Writing`,
/// owned by the state itself, where no queue eviction can reach it.
/// Reading is not a persistent state: every read decodes to exhaustion
/// within the same transact.
enum Link {
    /// No usable listener arrangement yet (initial state, or after an
    /// accept error).
    Invalid,
    /// Listening, no client attached.
    Connecting,
    /// Client attached, nothing in flight.
    Idle,
    /// Client attached, `sent` bytes of `frame` are on the wire and the
    /// remainder resumes on the next step.
    Writing { frame: Bytes, sent: usize },
}

/// Callback invoked once per decoded incoming frame, on the worker.
/// Must not block; hand long work elsewhere. May submit replies through
/// the provided writer.
pub(crate) type FrameHandler = Box<dyn FnMut(&ServerWriter, Frame) + Send>;

pub(crate) struct ServerMachine {
    endpoint: Endpoint,
    link: Link,
    queue: WriteQueue,
    decode: BytesMut,
    on_frame: FrameHandler,
    writer: ServerWriter,
    depth: Arc<AtomicUsize>,
}

impl ServerMachine {
    pub(crate) fn new(
        endpoint: Endpoint,
        capacity: usize,
        on_frame: FrameHandler,
        writer: ServerWriter,
        depth: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            endpoint,
            link: Link::Invalid,
            queue: WriteQueue::new(capacity),
            decode: BytesMut::new(),
            on_frame,
            writer,
            depth,
        }
    }

    /// Accept an encoded frame from a producer into the write queue.
    pub(crate) fn enqueue(&mut self, frame: Bytes) {
        self.queue.push(frame);
        self.publish_depth();
    }

    /// One bounded progress step.
    pub(crate) async fn transact(&mut self) -> Activity {
        let activity = self.step().await;
        self.publish_depth();
        activity
    }

    async fn step(&mut self) -> Activity {
        if matches!(self.link, Link::Invalid) {
            return self.arm();
        }
        if matches!(self.link, Link::Connecting) {
            return self.poll_accept().await;
        }

        // Reads outrank writes: a pipelining peer must not be able to
        // starve the decoder behind our own backlog.
        match self.receive() {
            Some(activity) => activity,
            None => self.flush(),
        }
    }

    fn arm(&mut self) -> Activity {
        match self.endpoint.rearm() {
            Ok(()) => {
                self.link = Link::Connecting;
                Activity::Busy
            }
            Err(err) => {
                error!(?err, "could not arm listener");
                Activity::Idle
            }
        }
    }

    async fn poll_accept(&mut self) -> Activity {
        match self.endpoint.accept_nb().await {
            Ok(Accepted::Connected) => {
                info!("client connected");
                self.decode = BytesMut::with_capacity(DEFAULT_BUFFER_SIZE);
                self.link = Link::Idle;
                Activity::Busy
            }
            Ok(Accepted::WouldBlock) => Activity::Idle,
            Err(err) => {
                warn!(?err, "accept failed");
                self.link = Link::Invalid;
                Activity::Busy
            }
        }
    }

    /// Try one read. `None` means the transport had nothing for us and
    /// the caller may move on to writing.
    fn receive(&mut self) -> Option<Activity> {
        self.decode.reserve(MIN_READ_CAPACITY);
        match self.endpoint.read_nb(&mut self.decode) {
            Ok(ReadOutcome::Got(n)) => {
                trace!(bytes = n, "received");
                match self.deliver_frames() {
                    Ok(()) => Some(Activity::Busy),
                    Err(err) => {
                        warn!(%err, "protocol violation, dropping client");
                        self.reset_client();
                        Some(Activity::Busy)
                    }
                }
            }
            Ok(ReadOutcome::WouldBlock) => None,
            Ok(ReadOutcome::PeerClosed) => {
                info!("client disconnected");
                self.reset_client();
                Some(Activity::Busy)
            }
            Err(err) => {
                warn!(?err, "read failed, dropping client");
                self.reset_client();
                Some(Activity::Busy)
            }
        }
    }

    /// Run the decoder over everything buffered, one callback per frame.
    fn deliver_frames(&mut self) -> Result<(), FrameError> {
        while let Some(frame) = codec::decode_frame(&mut self.decode)? {
            trace!(
                msg_type = frame.msg_type,
                len = frame.payload.len(),
                "frame received"
            );
            (self.on_frame)(&self.writer, frame);
        }
        Ok(())
    }

    /// Move queued bytes towards the wire: resume a partial frame if one
    /// is in flight, otherwise start sending the oldest queued frame.
    fn flush(&mut self) -> Activity {
        if matches!(self.link, Link::Writing { .. }) {
            return self.continue_write();
        }

        let Some(reservation) = self.queue.reserve_oldest() else {
            return Activity::Idle;
        };
        let total = reservation.bytes().len();
        match self.endpoint.write_nb(reservation.bytes()) {
            Ok(WriteOutcome::Sent(n)) if n == total => {
                trace!(bytes = n, "frame sent");
                reservation.complete();
                Activity::Busy
            }
            Ok(WriteOutcome::Sent(n)) => {
                // Short write: the frame leaves the queue and rides in
                // the Writing state until fully flushed.
                debug!(sent = n, total, "short write, will resume");
                let frame = reservation.into_bytes();
                self.link = Link::Writing { frame, sent: n };
                Activity::Busy
            }
            Ok(WriteOutcome::WouldBlock) => Activity::Idle,
            Ok(WriteOutcome::PeerClosed) => {
                drop(reservation);
                info!("client disconnected");
                self.reset_client();
                Activity::Busy
            }
            Err(err) => {
                drop(reservation);
                warn!(?err, "write failed, dropping client");
                self.reset_client();
                Activity::Busy
            }
        }
    }

    fn continue_write(&mut self) -> Activity {
        let Link::Writing { frame, sent } = &mut self.link else {
            return Activity::Idle;
        };
        match self.endpoint.write_nb(&frame[*sent..]) {
            Ok(WriteOutcome::Sent(n)) => {
                *sent += n;
                let done = *sent == frame.len();
                trace!(sent = *sent, total = frame.len(), "write resumed");
                if done {
                    self.link = Link::Idle;
                }
                Activity::Busy
            }
            Ok(WriteOutcome::WouldBlock) => Activity::Idle,
            Ok(WriteOutcome::PeerClosed) => {
                // The partial frame dies with the connection; replaying
                // it to a new client would corrupt its stream.
                info!("client disconnected mid-frame");
                self.reset_client();
                Activity::Busy
            }
            Err(err) => {
                warn!(?err, "write failed, dropping client");
                self.reset_client();
                Activity::Busy
            }
        }
    }

    /// Drop the current client and everything tied to it, keep the
    /// queue, and go back to listening.
    fn reset_client(&mut self) {
        self.endpoint.disconnect_client();
        self.decode = BytesMut::new();
        self.link = Link::Connecting;
    }

    /// Final teardown: drop queued frames and release the endpoint and
    /// its well-known name.
    pub(crate) fn close(&mut self) {
        self.queue.clear();
        self.publish_depth();
        self.endpoint.close();
        self.link = Link::Invalid;
        debug!("server machine closed");
    }

    fn publish_depth(&self) {
        self.depth.store(self.queue.len(), Ordering::Relaxed);
    }
}
