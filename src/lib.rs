//! An embeddable IPC backchannel for instrumented processes.
//!
//! `tether` runs a persistent, single-client server inside a host
//! process and exposes a bidirectional stream of typed, length-delimited
//! binary frames to an external frontend over a local transport (a Unix
//! domain socket, or a named pipe on Windows). The server lives on its
//! own background worker, survives the frontend connecting and
//! disconnecting at will, and buffers outgoing frames in a bounded
//! drop-oldest queue while nobody is attached.
//!
//! The pieces, leaves first:
//!
//! * [`codec`]: the stateless wire framing (encode/streaming decode).
//! * [`frame`]: message types and the ping/pong payload convention.
//! * [`queue`]: the bounded drop-oldest write queue.
//! * [`endpoint`]: the transport adapters and well-known naming.
//! * [`server`]: the state machine, worker loop and public handle.
//!
//! # Embedding
//!
//! ```no_run
//! use tether::{EndpointName, MsgType, PingBody, Server, utc_timestamp};
//!
//! fn main() -> Result<(), tether::StartError> {
//!     let name = EndpointName::for_pid(std::process::id());
//!     let mut server = Server::start(&name, 1024, |writer, frame| {
//!         // Answer link-health probes; hand everything else to the host.
//!         if frame.kind() == Some(MsgType::Ping) {
//!             if let Ok(body) = PingBody::decode(&frame.payload) {
//!                 let _ = writer.pong(body.serial, utc_timestamp());
//!             }
//!         }
//!     })?;
//!
//!     let _ = server.write(MsgType::Log, b"agent online");
//!     // ... host keeps running; the channel works in the background ...
//!     server.stop();
//!     Ok(())
//! }
//! ```
//!
//! A frontend finds the server through the same deterministic name
//! ([`EndpointName::for_pid`] → [`EndpointName::address`]) and speaks
//! the [`codec`] framing over a plain stream connection;
//! [`server_exists`] answers whether a given process already hosts a
//! server.

pub mod codec;
pub mod endpoint;
pub mod frame;
pub mod queue;
pub mod server;


pub use codec::{FrameError, MAX_PAYLOAD_LEN, decode_frame, encode_frame};
pub use endpoint::{EndpointName, NAME_PREFIX, StartError, server_exists};
pub use frame::{Frame, MsgType, PayloadError, PingBody, utc_timestamp};
pub use queue::WriteQueue;
pub use server::{Server, ServerWriter, WriteError};
