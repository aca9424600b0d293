//! The stream outcome taxonomy.

use thiserror::Error;

/// Everything a stream read or write can fail with.
///
/// The first three variants are the *expected* conditions of non-blocking
/// I/O and form the closed set callers branch on explicitly.  [`Fatal`]
/// (connection reset, permission error, and so on) is the separate
/// unrecoverable channel that propagates up to connection-lifecycle
/// management, which tears down the owning connection's event target.
///
/// [`Fatal`]: StreamError::Fatal
#[derive(Debug, Error)]
pub enum StreamError {
    /// The stream was already closed by the local side before the call; no
    /// bytes transferred.  Terminal.
    #[error("stream already closed")]
    Closed,

    /// The peer has cleanly closed its write side; no further reads will ever
    /// return data.  Terminal for reads only.
    #[error("reached end of stream")]
    EndOfStream,

    /// No data or buffer space currently available.  Zero bytes transferred,
    /// the stream remains open and usable: re-register readiness interest via
    /// the event queue and retry later.
    #[error("stream operation would block")]
    WouldBlock,

    /// Any other transport failure.  The owning collaborator is responsible
    /// for tearing down the affected connection's target.
    #[error("stream I/O failure: {0}")]
    Fatal(#[from] std::io::Error),
}

impl StreamError {
    /// Whether the same call may succeed later (only `WouldBlock`).
    pub fn is_retryable(&self) -> bool {
        matches!(self, StreamError::WouldBlock)
    }

    /// Whether the condition ends the stream's usefulness for this direction.
    pub fn is_terminal(&self) -> bool {
        !self.is_retryable()
    }
}

pub type StreamResult<T> = Result<T, StreamError>;
