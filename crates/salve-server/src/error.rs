//! Server errors.

use std::io;

use salve_core::ChannelError;
use thiserror::Error;

/// Errors surfaced by [`crate::ServerSession`].
#[derive(Debug, Error)]
pub enum ServerError {
    /// Listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested listen address
        addr: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Accepting a connection failed.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// Socket query failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// One session failed; the listener itself is unaffected.
    #[error(transparent)]
    Session(#[from] ChannelError),
}
