//! The [`Stream`] trait: bidirectional, byte-oriented, never blocking.

use crate::event::EventTarget;
use crate::io::buffer::StreamBuffer;
use crate::io::error::{StreamError, StreamResult};

/// Lifecycle of a stream.  `Closed` and `AtEndOfStream` are terminal for
/// reads; writes to a closed stream always fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    /// The peer closed its write side and the buffered bytes have drained.
    AtEndOfStream,
    /// Closed by the local side.
    Closed,
}

/// A bidirectional byte-oriented endpoint with non-blocking semantics.
///
/// Calls either transfer a definite byte count or fail with a
/// [`StreamError`]; they never suspend the calling thread.  On `WouldBlock`
/// the caller re-registers interest by watching for
/// [`EventType::STREAM_READABLE`](crate::EventType::STREAM_READABLE) /
/// [`EventType::STREAM_WRITABLE`](crate::EventType::STREAM_WRITABLE) events
/// addressed to [`target`](Stream::target), and retries when one arrives.
#[cfg_attr(test, mockall::automock)]
pub trait Stream: Send {
    /// Reads up to `buf.len()` bytes.  A stream in `Open` state with no data
    /// available fails with `WouldBlock`, repeatably and without side
    /// effects.
    fn read(&mut self, buf: &mut [u8]) -> StreamResult<usize>;

    /// Writes up to `data.len()` bytes, returning how many were accepted.
    fn write(&mut self, data: &[u8]) -> StreamResult<usize>;

    /// Closes the local side.  Further reads and writes fail with `Closed`;
    /// the peer observes end-of-stream once it drains what was sent.
    fn close(&mut self);

    fn state(&self) -> StreamState;

    /// The identity readiness events for this stream are addressed to.
    fn target(&self) -> &EventTarget;
}

/// Result of [`drain_into`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The stream has no more data for now (`WouldBlock`); wait for the next
    /// readable event.
    Drained,
    /// The peer closed its write side; no further readable events will come.
    EndOfStream,
}

/// The canonical body of a readable-event handler: reads until the stream
/// reports `WouldBlock` or end-of-stream, appending everything to `buffer`.
///
/// # Errors
///
/// Propagates `Closed` and `Fatal` untouched; the owning collaborator reacts
/// by tearing down the connection's target.
pub fn drain_into(stream: &mut dyn Stream, buffer: &mut StreamBuffer) -> StreamResult<DrainOutcome> {
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return Ok(DrainOutcome::Drained),
            Ok(n) => buffer.write(&chunk[..n]),
            Err(StreamError::WouldBlock) => return Ok(DrainOutcome::Drained),
            Err(StreamError::EndOfStream) => return Ok(DrainOutcome::EndOfStream),
            Err(err) => return Err(err),
        }
    }
}
