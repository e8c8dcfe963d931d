//! Peer certificate trust policy.
//!
//! The TLS layer classifies each presented certificate into a
//! [`ValidationOutcome`]; [`TrustPolicy::decide`] turns that outcome into a
//! [`Verdict`]. The decision is a pure function of the outcome and the
//! policy, and the same policy object is consulted on the client side (for the
//! server certificate) and on the server side (for the client certificate).
//!
//! # Rules
//!
//! 1. `Valid` is accepted.
//! 2. `ChainError` (issuer not trusted) is accepted only when the policy was
//!    built with [`TrustPolicy::trust_self_signed`]. This is meant for closed
//!    deployments whose certificates are distributed out of band; anyone who
//!    can produce a certificate with the right name and validity window is
//!    accepted.
//! 3. Every other outcome is rejected and reported.

use std::fmt;

/// Result of validating a peer certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Certificate chains to a trust anchor and passed every check.
    Valid,
    /// Certificate is well formed but its issuer is not trusted.
    ChainError,
    /// Certificate does not carry the expected peer name.
    NameMismatch {
        /// Name the peer was expected to present
        expected: String,
    },
    /// Validity window ended before the handshake.
    Expired,
    /// Validity window starts after the handshake.
    NotYetValid,
    /// Certificate was revoked by its issuer.
    Revoked,
    /// Certificate could not be parsed.
    Malformed(String),
    /// Any other validation failure.
    Other(String),
}

impl ValidationOutcome {
    /// Short stable name of the outcome class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::ChainError => "chain-error",
            Self::NameMismatch { .. } => "name-mismatch",
            Self::Expired => "expired",
            Self::NotYetValid => "not-yet-valid",
            Self::Revoked => "revoked",
            Self::Malformed(_) => "malformed",
            Self::Other(_) => "other",
        }
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => f.write_str("certificate is valid"),
            Self::ChainError => f.write_str("certificate issuer is not trusted"),
            Self::NameMismatch { expected } => {
                write!(f, "certificate is not valid for name {expected:?}")
            },
            Self::Expired => f.write_str("certificate has expired"),
            Self::NotYetValid => f.write_str("certificate is not valid yet"),
            Self::Revoked => f.write_str("certificate has been revoked"),
            Self::Malformed(reason) => write!(f, "certificate is malformed: {reason}"),
            Self::Other(reason) => write!(f, "certificate validation failed: {reason}"),
        }
    }
}

/// Decision taken by [`TrustPolicy::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Peer certificate is acceptable.
    Accept,
    /// Peer certificate is refused; carries the outcome that caused it.
    Reject(ValidationOutcome),
}

impl Verdict {
    /// True when the peer was accepted.
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Accept/reject policy for peer certificates.
///
/// `Default` is strict: only fully valid chains are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrustPolicy {
    trust_self_signed: bool,
}

impl TrustPolicy {
    /// Accept only certificates that chain to a configured trust anchor.
    pub const fn strict() -> Self {
        Self { trust_self_signed: false }
    }

    /// Additionally accept certificates whose issuer is not trusted.
    ///
    /// Name, validity window and every other check still apply.
    pub const fn trust_self_signed() -> Self {
        Self { trust_self_signed: true }
    }

    /// Whether untrusted-issuer outcomes are accepted.
    pub const fn trusts_self_signed(&self) -> bool {
        self.trust_self_signed
    }

    /// Decide whether a peer certificate with this outcome is acceptable.
    ///
    /// `expected_peer_name` is only used in the rejection diagnostic; name
    /// checking has already been folded into `outcome`.
    pub fn decide(&self, outcome: &ValidationOutcome, expected_peer_name: Option<&str>) -> Verdict {
        match outcome {
            ValidationOutcome::Valid => Verdict::Accept,
            ValidationOutcome::ChainError if self.trust_self_signed => {
                tracing::debug!(peer = ?expected_peer_name, "accepting certificate from untrusted issuer");
                Verdict::Accept
            },
            rejected => {
                tracing::warn!(
                    peer = ?expected_peer_name,
                    outcome = rejected.kind(),
                    "certificate validation error: {rejected}"
                );
                Verdict::Reject(rejected.clone())
            },
        }
    }
}
