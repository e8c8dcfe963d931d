//! Test harness for Salve endpoints.
//!
//! Certificate fixtures minted with rcgen, in-memory channel pairs over
//! `tokio::io::duplex`, and a TLS client that deliberately presents no
//! certificate, for exercising the server's mandatory client authentication.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod anonymous;
pub mod fixtures;
pub mod pair;

use salve_core::{ChannelConfig, TrustPolicy};

pub use anonymous::handshake_without_certificate;
pub use fixtures::{
    CLIENT_NAME, IdentityBuilder, IdentityFiles, Role, SERVER_NAME, TestCa, TestIdentity,
};
pub use pair::ChannelPair;

/// Error type for fixture construction.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Default channel configuration with self-signed peers trusted.
pub fn permissive_config() -> ChannelConfig {
    ChannelConfig { trust: TrustPolicy::trust_self_signed(), ..ChannelConfig::default() }
}

/// Install a test-friendly tracing subscriber, honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
