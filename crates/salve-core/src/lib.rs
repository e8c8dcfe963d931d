//! Salve trust-establishment core
//!
//! Mutual certificate authentication over TLS between one client and one
//! server, followed by an exchange of plain UTF-8 messages.
//!
//! # Architecture
//!
//! The role drivers (`salve-client`, `salve-server`) own the transport and
//! hand it to a [`SecureChannel`] together with the local [`Identity`]. The
//! channel runs the handshake; while doing so the TLS layer classifies the
//! peer certificate into a [`ValidationOutcome`] and the [`TrustPolicy`]
//! decides whether the peer is acceptable. Only then does the channel become
//! `Established` and carry application data.
//!
//! Accepting self-signed peers is an explicit choice
//! ([`TrustPolicy::trust_self_signed`]); the default policy is strict.
//!
//! # Components
//!
//! - [`identity`]: Identity loading (PEM bundle, optional passphrase)
//! - [`trust`]: Validation outcomes and the accept/reject policy
//! - [`channel`]: Secure channel state machine, send/receive
//! - [`config`]: Channel configuration and protocol version pinning
//! - [`error`]: Identity and channel error types

pub mod certificate;
pub mod channel;
pub mod config;
pub mod error;
pub mod identity;
pub mod trust;

mod tls;

pub use certificate::PeerCertificate;
pub use channel::{ChannelState, Exchange, SecureChannel};
pub use config::{ChannelConfig, ParseTlsVersionError, RECEIVE_BUFFER_SIZE, TlsVersion};
pub use error::{ChannelError, HandshakeFailure, IdentityError};
pub use identity::{CertificateStore, Identity, load_trust_anchors};
pub use trust::{TrustPolicy, ValidationOutcome, Verdict};
