//! Non-blocking stream contract: the [`Stream`] trait, the
//! [`StreamError`] taxonomy, the chunked [`StreamBuffer`], and an in-memory
//! [`pipe`] honoring the full contract (readiness events included).

pub mod buffer;
pub mod error;
pub mod pipe;
pub mod stream;

pub use buffer::StreamBuffer;
pub use error::{StreamError, StreamResult};
pub use pipe::{pipe, PipeStream};
pub use stream::{drain_into, DrainOutcome, Stream, StreamState};
