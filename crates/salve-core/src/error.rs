//! Error types for identity loading and the secure channel.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::{channel::ChannelState, trust::ValidationOutcome};

/// Failure to load a local identity or trust anchor file.
///
/// Always fatal at startup: an endpoint without an identity cannot take part
/// in a mutually authenticated handshake.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// File missing or unreadable.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path that could not be read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// PEM structure could not be parsed.
    #[error("invalid PEM data: {0}")]
    InvalidPem(String),

    /// No `CERTIFICATE` block was found.
    #[error("no certificate found")]
    MissingCertificate,

    /// No private key block was found.
    #[error("no private key found")]
    MissingPrivateKey,

    /// The private key is encrypted and no passphrase was supplied.
    #[error("private key is encrypted but no passphrase was supplied")]
    PassphraseRequired,

    /// The passphrase did not decrypt the private key.
    #[error("wrong passphrase for encrypted private key")]
    BadPassphrase,

    /// The key cannot be used by the TLS crypto provider.
    #[error("unsupported private key: {0}")]
    UnsupportedKey(String),

    /// The end-entity certificate is not a parseable X.509 certificate.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),
}

/// Why a handshake failed, when the cause is not a trust-policy rejection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeFailure {
    /// Transport failed or was closed mid-handshake.
    #[error("transport failure during handshake: {0}")]
    Io(String),

    /// The peers could not agree on the pinned protocol version.
    #[error("protocol version mismatch: {0}")]
    ProtocolVersion(String),

    /// The peer presented no certificate although one is required.
    #[error("peer presented no certificate")]
    MissingPeerCertificate,

    /// Any other TLS-level failure (bad signature, alert, malformed record).
    #[error("{0}")]
    Tls(String),
}

/// Errors raised by [`crate::SecureChannel`] operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Operation requires an established channel.
    #[error("cannot {operation} in state {state:?}")]
    NotEstablished {
        /// State the channel was in
        state: ChannelState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Handshake requested on a channel that already left `Created`.
    #[error("cannot {operation} in state {state:?}")]
    InvalidState {
        /// State the channel was in
        state: ChannelState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Handshake failed for a reason other than trust policy.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeFailure),

    /// Trust policy rejected the peer certificate.
    #[error("peer certificate rejected: {outcome}")]
    CertificateRejected {
        /// Validation outcome that led to the rejection
        outcome: ValidationOutcome,
    },

    /// The expected server name is not a valid DNS name or IP address.
    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    /// TLS configuration could not be built from the identity and settings.
    #[error("TLS configuration error: {0}")]
    Config(String),

    /// Outgoing message was empty.
    #[error("cannot send an empty message")]
    EmptyMessage,

    /// Outgoing message does not fit the peer's receive buffer.
    #[error("message of {size} bytes exceeds the {max} byte receive buffer")]
    MessageTooLarge {
        /// Encoded message size
        size: usize,
        /// Receive buffer size
        max: usize,
    },

    /// Transport read or write failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Peer shut the connection down.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// A configured timeout elapsed.
    #[error("{operation} timed out")]
    Timeout {
        /// Operation that timed out
        operation: &'static str,
    },
}

impl ChannelError {
    /// True for failures raised while establishing the channel.
    pub fn is_handshake_failure(&self) -> bool {
        matches!(self, Self::Handshake(_) | Self::CertificateRejected { .. })
    }
}
