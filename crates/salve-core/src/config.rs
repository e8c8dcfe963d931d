//! Channel configuration.

use std::{fmt, str::FromStr, time::Duration};

use rustls::pki_types::CertificateDer;
use thiserror::Error;

use crate::trust::TrustPolicy;

/// Receive buffer size; one read of at most this many bytes is one message.
pub const RECEIVE_BUFFER_SIZE: usize = 8192;

/// Upper bound on sending close_notify when closing an established channel.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// TLS protocol version a channel is pinned to.
///
/// Exactly one version is offered and accepted; there is no negotiation up or
/// down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVersion {
    /// TLS 1.2
    #[default]
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    pub(crate) fn supported(self) -> &'static rustls::SupportedProtocolVersion {
        match self {
            Self::Tls12 => &rustls::version::TLS12,
            Self::Tls13 => &rustls::version::TLS13,
        }
    }

    pub(crate) fn from_negotiated(version: rustls::ProtocolVersion) -> Option<Self> {
        match version {
            rustls::ProtocolVersion::TLSv1_2 => Some(Self::Tls12),
            rustls::ProtocolVersion::TLSv1_3 => Some(Self::Tls13),
            _ => None,
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tls12 => f.write_str("1.2"),
            Self::Tls13 => f.write_str("1.3"),
        }
    }
}

/// Unrecognised protocol version string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported TLS version {0:?} (expected 1.2 or 1.3)")]
pub struct ParseTlsVersionError(String);

impl FromStr for TlsVersion {
    type Err = ParseTlsVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().trim_start_matches("tls").trim_start_matches('v') {
            "1.2" | "12" => Ok(Self::Tls12),
            "1.3" | "13" => Ok(Self::Tls13),
            _ => Err(ParseTlsVersionError(s.to_string())),
        }
    }
}

/// Secure channel configuration.
///
/// Defaults match the reference deployment: TLS 1.2, mandatory client
/// certificates, an 8 KiB receive buffer and no timeouts. The default trust
/// policy is strict; self-signed peers must be opted into explicitly.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Protocol version both sides must use
    pub protocol_version: TlsVersion,
    /// Decision applied to every peer certificate
    pub trust: TrustPolicy,
    /// CA certificates a peer chain may terminate in (may be empty)
    pub trust_anchors: Vec<CertificateDer<'static>>,
    /// Server side: refuse clients that present no certificate
    pub require_client_certificate: bool,
    /// Server side: name the client certificate must carry, if any
    pub expected_peer_name: Option<String>,
    /// Bound on the TLS handshake
    pub handshake_timeout: Option<Duration>,
    /// Bound on a single `receive` call
    pub receive_timeout: Option<Duration>,
    /// Bound on sending close_notify
    pub close_timeout: Duration,
    /// Size of the single-read receive buffer
    pub receive_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            protocol_version: TlsVersion::default(),
            trust: TrustPolicy::default(),
            trust_anchors: Vec::new(),
            require_client_certificate: true,
            expected_peer_name: None,
            handshake_timeout: None,
            receive_timeout: None,
            close_timeout: CLOSE_TIMEOUT,
            receive_buffer_size: RECEIVE_BUFFER_SIZE,
        }
    }
}
