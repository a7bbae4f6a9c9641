use crate::codec::FrameError;
use thiserror::Error;

/// Errors surfaced by write submission.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The server has been stopped; the frame was not enqueued.
    #[error("server is stopped")]
    Closed,

    /// The payload could not be framed.
    #[error(transparent)]
    Frame(#[from] FrameError),
}
