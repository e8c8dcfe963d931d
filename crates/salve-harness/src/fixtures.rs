//! Certificate fixtures generated with rcgen.
//!
//! Production endpoints load identities that already exist on disk; tests
//! mint them here. Default names follow the reference deployment: the server
//! certificate is `CN=Server`, the client certificate is `CN=Utente`.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, date_time_ymd,
};
use salve_core::Identity;
use tempfile::TempDir;

use crate::BoxError;

/// Common name of the default server identity.
pub const SERVER_NAME: &str = "Server";

/// Common name of the default client identity.
pub const CLIENT_NAME: &str = "Utente";

/// Which side of the handshake a certificate is issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// TLS server authentication
    Server,
    /// TLS client authentication
    Client,
}

impl Role {
    fn usage(self) -> ExtendedKeyUsagePurpose {
        match self {
            Self::Server => ExtendedKeyUsagePurpose::ServerAuth,
            Self::Client => ExtendedKeyUsagePurpose::ClientAuth,
        }
    }
}

/// A certificate and its private key, PEM encoded.
#[derive(Debug, Clone)]
pub struct TestIdentity {
    /// Certificate chain, end-entity first
    pub cert_pem: String,
    /// Unencrypted PKCS#8 private key
    pub key_pem: String,
    key_der: Vec<u8>,
}

impl TestIdentity {
    /// Self-signed server identity valid for `common_name`.
    pub fn server(common_name: &str) -> Result<Self, BoxError> {
        IdentityBuilder::new(common_name, Role::Server).self_signed()
    }

    /// Self-signed client identity valid for `common_name`.
    pub fn client(common_name: &str) -> Result<Self, BoxError> {
        IdentityBuilder::new(common_name, Role::Client).self_signed()
    }

    /// Certificate followed by the unencrypted key, as one bundle.
    pub fn bundle_pem(&self) -> String {
        format!("{}{}", self.cert_pem, self.key_pem)
    }

    /// Certificate followed by the key encrypted under `passphrase`.
    pub fn encrypted_bundle_pem(&self, passphrase: &str) -> Result<String, BoxError> {
        let info = pkcs8::PrivateKeyInfo::try_from(self.key_der.as_slice())?;
        let encrypted = info.encrypt(rand::rngs::OsRng, passphrase.as_bytes())?;
        let key_pem = encrypted.to_pem("ENCRYPTED PRIVATE KEY", pkcs8::LineEnding::LF)?;
        Ok(format!("{}{}", self.cert_pem, key_pem.as_str()))
    }

    /// Parse the bundle into a shareable [`Identity`].
    pub fn identity(&self) -> Result<Arc<Identity>, BoxError> {
        Ok(Arc::new(Identity::from_pem(self.bundle_pem().as_bytes(), None)?))
    }

    /// Write the unencrypted bundle to `dir/file_name`.
    pub fn write_bundle(&self, dir: &Path, file_name: &str) -> Result<PathBuf, BoxError> {
        let path = dir.join(file_name);
        fs::write(&path, self.bundle_pem())?;
        Ok(path)
    }
}

/// Builder for end-entity fixtures.
#[derive(Debug, Clone)]
pub struct IdentityBuilder {
    common_name: String,
    role: Role,
    subject_alt_names: Vec<String>,
    expired: bool,
}

impl IdentityBuilder {
    /// Certificate for `common_name`, with the same name as its only SAN.
    pub fn new(common_name: &str, role: Role) -> Self {
        Self {
            common_name: common_name.to_string(),
            role,
            subject_alt_names: vec![common_name.to_string()],
            expired: false,
        }
    }

    /// Replace the subject alternative names (an empty list keeps only the CN).
    #[must_use]
    pub fn subject_alt_names(mut self, names: &[&str]) -> Self {
        self.subject_alt_names = names.iter().map(ToString::to_string).collect();
        self
    }

    /// Make the validity window end in the past.
    #[must_use]
    pub fn expired(mut self) -> Self {
        self.expired = true;
        self
    }

    fn params(&self) -> Result<CertificateParams, BoxError> {
        let mut params = CertificateParams::new(self.subject_alt_names.clone())?;
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, self.common_name.as_str());
        params.extended_key_usages = vec![self.role.usage()];
        if self.expired {
            params.not_before = date_time_ymd(2000, 1, 1);
            params.not_after = date_time_ymd(2001, 1, 1);
        }
        Ok(params)
    }

    /// Sign the certificate with its own key.
    pub fn self_signed(&self) -> Result<TestIdentity, BoxError> {
        let key = KeyPair::generate()?;
        let cert = self.params()?.self_signed(&key)?;
        Ok(TestIdentity { cert_pem: cert.pem(), key_pem: key.serialize_pem(), key_der: key.serialize_der() })
    }

    /// Sign the certificate with a test CA.
    pub fn signed_by(&self, ca: &TestCa) -> Result<TestIdentity, BoxError> {
        let key = KeyPair::generate()?;
        let cert = self.params()?.signed_by(&key, &ca.cert, &ca.key)?;
        Ok(TestIdentity { cert_pem: cert.pem(), key_pem: key.serialize_pem(), key_der: key.serialize_der() })
    }
}

static NEXT_CA: AtomicU64 = AtomicU64::new(1);

/// Certificate authority for tests that need a fully valid chain.
pub struct TestCa {
    cert: Certificate,
    key: KeyPair,
}

impl fmt::Debug for TestCa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCa").finish_non_exhaustive()
    }
}

impl TestCa {
    /// Fresh self-signed CA with a name no other `TestCa` in this process shares.
    pub fn new() -> Result<Self, BoxError> {
        let serial = NEXT_CA.fetch_add(1, Ordering::Relaxed);
        Self::named(&format!("Test CA {serial}"))
    }

    /// Fresh self-signed CA named `common_name`.
    ///
    /// Two CAs built with the same name have different keys, so a certificate
    /// issued by one names the other as its issuer but fails its signature.
    pub fn named(common_name: &str) -> Result<Self, BoxError> {
        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

        let key = KeyPair::generate()?;
        let cert = params.self_signed(&key)?;
        Ok(Self { cert, key })
    }

    /// CA certificate as a PEM trust-anchor file body.
    pub fn cert_pem(&self) -> String {
        self.cert.pem()
    }

    /// CA certificate in DER, ready for [`salve_core::ChannelConfig::trust_anchors`].
    pub fn anchor(&self) -> rustls::pki_types::CertificateDer<'static> {
        self.cert.der().clone()
    }
}

/// Default self-signed identities written to a temporary directory.
#[derive(Debug)]
pub struct IdentityFiles {
    /// Server bundle (`CN=Server`)
    pub server: PathBuf,
    /// Client bundle (`CN=Utente`)
    pub client: PathBuf,
    _dir: TempDir,
}

impl IdentityFiles {
    /// Generate and write both default identities.
    pub fn generate() -> Result<Self, BoxError> {
        let dir = tempfile::tempdir()?;
        let server = TestIdentity::server(SERVER_NAME)?.write_bundle(dir.path(), "self-server.pem")?;
        let client = TestIdentity::client(CLIENT_NAME)?.write_bundle(dir.path(), "self-utente.pem")?;
        Ok(Self { server, client, _dir: dir })
    }
}
