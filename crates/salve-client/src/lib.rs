//! Salve client role driver.
//!
//! Connects to a server, runs the mutually authenticated handshake, sends one
//! greeting, waits for one reply and closes. Nothing is retried: the first
//! failure ends the session and is returned to the caller.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod session;

pub use error::ClientError;
pub use session::{ClientSession, ClientSessionConfig};
