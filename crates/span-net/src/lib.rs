//! # span-net
//!
//! TCP transport for SpanLink, implemented against the `span-core` stream
//! contract.
//!
//! A [`TcpLink`] is a [`Stream`](span_core::Stream) over a connected TCP
//! socket: reads and writes never block the caller, readiness is reported as
//! `STREAM_READABLE` / `STREAM_WRITABLE` events on the link's target, and
//! the Closed / EndOfStream / WouldBlock taxonomy maps onto socket state.
//! Internally each link runs a dedicated reader thread (blocking socket
//! reads into a shared buffer) and a writer thread (draining a bounded
//! outbound buffer), the same blocking-thread bridge the rest of SpanLink
//! uses for synchronous OS-level I/O.
//!
//! A [`TcpAcceptor`] owns a listening socket and posts one
//! [`connection_accepted`] event per inbound connection, carrying the new
//! [`TcpLink`] as the event payload, so the connection manager picks up
//! peers on the dispatch thread like any other event.

pub mod acceptor;
pub mod error;
pub mod link;

pub use acceptor::{connection_accepted, TcpAcceptor};
pub use error::NetError;
pub use link::TcpLink;
