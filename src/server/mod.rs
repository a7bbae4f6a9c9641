//! The embedder-facing server: a background worker owning the state
//! machine, paced by a tick clock, fed by thread-safe write submission.
//!
//! Concurrency model: exactly one worker task ever touches the endpoint,
//! the decode buffer and the write queue, so none of them are locked.
//! Producers (any thread, including the `on_frame` callback itself)
//! submit encoded frames through an unbounded channel that the worker
//! drains into its private queue. Frames from one producer keep their
//! order on the wire (minus overflow evictions); frames from different
//! producers are ordered by submission.

mod error;
mod machine;

pub use error::WriteError;

use crate::codec;
use crate::endpoint::{Endpoint, EndpointName, StartError};
use crate::frame::{Frame, MsgType, PingBody};
use bytes::Bytes;
use machine::{Activity, ServerMachine};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Cadence of the worker's tick clock.
const TICK_INTERVAL: Duration = Duration::from_millis(500);
/// How many busy transacts may run back-to-back before the worker
/// checks its tick and shutdown signals again.
const MAX_TRANSACTS_PER_TICK: usize = 64;
/// How long `stop` waits for the worker before forcing teardown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);
/// Grace given to the runtime when teardown is forced.
const FORCE_SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Thread-safe write submission handle.
///
/// Clones freely; every clone feeds the same server. Submission encodes
/// the frame, transfers ownership into the worker's queue, and never
/// blocks, which makes it safe to call from inside `on_frame`.
#[derive(Clone, Debug)]
pub struct ServerWriter {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl ServerWriter {
    /// Encode `payload` under `msg_type` and queue it for the frontend.
    pub fn write(&self, msg_type: impl Into<u8>, payload: &[u8]) -> Result<(), WriteError> {
        let frame = codec::encode_frame(msg_type, payload)?;
        self.tx.send(frame).map_err(|_| WriteError::Closed)
    }

    /// Queue a link-health probe carrying `serial` and `timestamp`.
    pub fn ping(&self, serial: u32, timestamp: f64) -> Result<(), WriteError> {
        self.write(MsgType::Ping, &PingBody::new(serial, timestamp).encode())
    }

    /// Queue the reply to a probe, echoing its `serial`.
    pub fn pong(&self, serial: u32, timestamp: f64) -> Result<(), WriteError> {
        self.write(MsgType::Pong, &PingBody::new(serial, timestamp).encode())
    }

    /// Queue a single-byte signal message.
    pub fn signal(&self, signal: u8) -> Result<(), WriteError> {
        self.write(MsgType::Signal, &[signal])
    }
}

/// A running IPC server.
///
/// The server is persistent across client connects and disconnects, and
/// keeps its write queue across reconnects: a frontend that comes back
/// within the queue's lifetime receives the backlog. A reconnecting
/// peer that must guard against stale backlog needs its own session or
/// sequence discipline in the payload.
///
/// Dropping the server stops it. Because teardown blocks on the worker,
/// the server must be dropped (or [`stop`](Server::stop)ped) from
/// outside any async runtime.
#[derive(Debug)]
pub struct Server {
    writer: ServerWriter,
    shutdown: watch::Sender<bool>,
    running: Arc<AtomicBool>,
    depth: Arc<AtomicUsize>,
    done: Option<std_mpsc::Receiver<()>>,
    runtime: Option<Runtime>,
}

impl Server {
    /// Bind the well-known endpoint and start the worker.
    ///
    /// Binding happens synchronously; a name owned by a live server
    /// fails with [`StartError::AlreadyBound`] and nothing is spawned.
    /// `capacity` bounds the write queue (see
    /// [`queue::DEFAULT_CAPACITY`](crate::queue::DEFAULT_CAPACITY) for
    /// the conventional choice); `on_frame` runs on the worker for every
    /// decoded incoming frame and must not block.
    pub fn start<F>(name: &EndpointName, capacity: usize, on_frame: F) -> Result<Self, StartError>
    where
        F: FnMut(&ServerWriter, Frame) + Send + 'static,
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("tether-ipc")
            .enable_all()
            .build()?;

        let endpoint = {
            let _guard = runtime.enter();
            Endpoint::bind(name)?
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = std_mpsc::channel();
        let writer = ServerWriter { tx };
        let running = Arc::new(AtomicBool::new(true));
        let depth = Arc::new(AtomicUsize::new(0));

        let machine = ServerMachine::new(
            endpoint,
            capacity,
            Box::new(on_frame),
            writer.clone(),
            Arc::clone(&depth),
        );
        runtime.spawn(run(machine, rx, shutdown_rx, Arc::clone(&running), done_tx));
        info!(%name, "ipc server started");

        Ok(Self {
            writer,
            shutdown,
            running,
            depth,
            done: Some(done_rx),
            runtime: Some(runtime),
        })
    }

    /// Encode `payload` under `msg_type` and queue it for the frontend.
    pub fn write(&self, msg_type: impl Into<u8>, payload: &[u8]) -> Result<(), WriteError> {
        self.writer.write(msg_type, payload)
    }

    /// A submission handle usable from other threads and callbacks.
    pub fn writer(&self) -> ServerWriter {
        self.writer.clone()
    }

    /// Whether the worker is still alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Frames currently held in the write queue, as last published by
    /// the worker.
    pub fn pending(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Stop the server: signal the worker, wait up to a bounded timeout
    /// for a clean exit, then force teardown. Idempotent.
    pub fn stop(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        let _ = self.shutdown.send(true);
        if let Some(done) = self.done.take() {
            match done.recv_timeout(SHUTDOWN_TIMEOUT) {
                Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                    debug!("worker exited cleanly")
                }
                Err(std_mpsc::RecvTimeoutError::Timeout) => {
                    warn!("worker did not stop in time, forcing teardown")
                }
            }
        }
        runtime.shutdown_timeout(FORCE_SHUTDOWN_GRACE);
        self.running.store(false, Ordering::Release);
        info!("ipc server stopped");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The worker loop: drain submissions, transact while busy (bounded),
/// then sleep until the tick, a shutdown signal or new outbound traffic.
async fn run(
    mut machine: ServerMachine,
    mut submissions: mpsc::UnboundedReceiver<Bytes>,
    mut shutdown: watch::Receiver<bool>,
    running: Arc<AtomicBool>,
    done: std_mpsc::Sender<()>,
) {
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    // A stalled tick is skipped, not replayed in a burst.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!("ipc worker running");

    'main: loop {
        while let Ok(frame) = submissions.try_recv() {
            machine.enqueue(frame);
        }

        let mut spins = 0;
        while spins < MAX_TRANSACTS_PER_TICK {
            if *shutdown.borrow() {
                break 'main;
            }
            match machine.transact().await {
                Activity::Busy => {
                    spins += 1;
                    while let Ok(frame) = submissions.try_recv() {
                        machine.enqueue(frame);
                    }
                }
                Activity::Idle => break,
            }
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break 'main;
                }
            }
            _ = ticker.tick() => {}
            frame = submissions.recv() => match frame {
                Some(frame) => machine.enqueue(frame),
                None => break 'main,
            },
        }
    }

    machine.close();
    running.store(false, Ordering::Release);
    debug!("ipc worker stopped");
    let _ = done.send(());
}
