//! Salve server role driver.
//!
//! Loads one identity, listens on a TCP port and runs one independent
//! session per accepted connection: handshake, greeting, one reply, close.
//!
//! # Failure isolation
//!
//! Every connection is handled behind its own error boundary. A failed
//! handshake, a rejected certificate or a peer that disappears is logged and
//! the listener moves on to the next connection; only the shutdown signal
//! ends [`ServerSession::serve_until`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod session;

pub use error::ServerError;
pub use session::{ServeMode, ServerSession, ServerSessionConfig};
