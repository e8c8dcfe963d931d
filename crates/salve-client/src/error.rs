//! Client session errors.

use std::io;

use salve_core::{ChannelError, IdentityError};
use thiserror::Error;

/// Why a client session did not complete.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The local identity could not be loaded.
    #[error("failed to load identity: {0}")]
    Identity(#[from] IdentityError),

    /// TCP connection could not be opened.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address that was dialled
        addr: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// TCP connection was not established within the connect timeout.
    #[error("connection to {addr} timed out")]
    ConnectTimeout {
        /// Address that was dialled
        addr: String,
    },

    /// Handshake, trust decision or message exchange failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}
