//! Error type for transport setup operations.

use std::net::SocketAddr;

use thiserror::Error;

/// Errors from binding, connecting, or configuring sockets.
///
/// Stream-level conditions (`WouldBlock`, `EndOfStream`, ...) are *not*
/// represented here; once a link exists, its reads and writes speak
/// [`StreamError`](span_core::StreamError).
#[derive(Debug, Error)]
pub enum NetError {
    /// The listening socket could not be bound.
    #[error("failed to bind listener on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The outbound connection attempt failed.
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Post-connect socket configuration (nodelay, clone, thread spawn) failed.
    #[error("socket setup failed: {0}")]
    Setup(#[from] std::io::Error),
}
