//! rustls configuration and peer certificate verification.
//!
//! Both directions of the handshake use the same check: [`PeerCheck`]
//! classifies the presented certificate into a [`ValidationOutcome`] and asks
//! the [`TrustPolicy`]. The two verifier types only adapt it to the rustls
//! client-side and server-side traits. Handshake signatures are always
//! verified with the provider's algorithms, so the peer must own the private
//! key of the certificate it presents regardless of the policy.

use std::{io, sync::Arc};

use rustls::{
    AlertDescription, CertificateError, DigitallySignedStruct, DistinguishedName, OtherError,
    PeerIncompatible, RootCertStore, SignatureScheme,
    client::{
        WebPkiServerVerifier,
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    },
    crypto::{CryptoProvider, WebPkiSupportedAlgorithms},
    pki_types::{CertificateDer, ServerName, UnixTime},
    server::{
        WebPkiClientVerifier,
        danger::{ClientCertVerified, ClientCertVerifier},
    },
};
use thiserror::Error;

use crate::{
    certificate::{self, ExpectedName},
    config::ChannelConfig,
    error::{ChannelError, HandshakeFailure},
    identity::Identity,
    trust::{TrustPolicy, ValidationOutcome, Verdict},
};

/// Carried inside the rustls error so the channel can report the outcome.
#[derive(Debug, Error)]
#[error("{outcome}")]
struct Rejection {
    outcome: ValidationOutcome,
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn config_error(err: impl std::fmt::Display) -> ChannelError {
    ChannelError::Config(err.to_string())
}

fn root_store(anchors: &[CertificateDer<'static>]) -> Result<Arc<RootCertStore>, ChannelError> {
    let mut roots = RootCertStore::empty();
    for anchor in anchors {
        roots.add(anchor.clone()).map_err(config_error)?;
    }
    Ok(Arc::new(roots))
}

/// Build the client side TLS configuration for `identity`.
pub(crate) fn client_config(
    identity: &Identity,
    config: &ChannelConfig,
) -> Result<rustls::ClientConfig, ChannelError> {
    let provider = provider();

    let anchors = if config.trust_anchors.is_empty() {
        None
    } else {
        let verifier =
            WebPkiServerVerifier::builder_with_provider(root_store(&config.trust_anchors)?, provider.clone())
                .build()
                .map_err(config_error)?;
        Some(verifier)
    };
    let verifier = ServerCertificateVerifier {
        check: PeerCheck::new(config.trust, &provider),
        anchors,
    };

    rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[config.protocol_version.supported()])
        .map_err(config_error)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_client_auth_cert(identity.certificate_chain().to_vec(), identity.private_key())
        .map_err(config_error)
}

/// Build the server side TLS configuration for `identity`.
pub(crate) fn server_config(
    identity: &Identity,
    config: &ChannelConfig,
) -> Result<rustls::ServerConfig, ChannelError> {
    let provider = provider();

    let anchors = if config.trust_anchors.is_empty() {
        None
    } else {
        let verifier =
            WebPkiClientVerifier::builder_with_provider(root_store(&config.trust_anchors)?, provider.clone())
                .build()
                .map_err(config_error)?;
        Some(verifier)
    };
    let verifier = ClientCertificateVerifier {
        check: PeerCheck::new(config.trust, &provider),
        anchors,
        expected_name: config.expected_peer_name.as_deref().map(ExpectedName::from_hint),
        mandatory: config.require_client_certificate,
    };

    rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[config.protocol_version.supported()])
        .map_err(config_error)?
        .with_client_cert_verifier(Arc::new(verifier))
        .with_single_cert(identity.certificate_chain().to_vec(), identity.private_key())
        .map_err(config_error)
}

/// Translate a failed tokio-rustls handshake into a channel error.
pub(crate) fn handshake_error(err: io::Error) -> ChannelError {
    let Some(tls) = err.get_ref().and_then(|inner| inner.downcast_ref::<rustls::Error>()) else {
        return HandshakeFailure::Io(err.to_string()).into();
    };

    match tls {
        rustls::Error::InvalidCertificate(CertificateError::Other(OtherError(inner))) => {
            match inner.downcast_ref::<Rejection>() {
                Some(rejection) => {
                    ChannelError::CertificateRejected { outcome: rejection.outcome.clone() }
                },
                None => HandshakeFailure::Tls(tls.to_string()).into(),
            }
        },
        rustls::Error::NoCertificatesPresented => HandshakeFailure::MissingPeerCertificate.into(),
        rustls::Error::AlertReceived(AlertDescription::ProtocolVersion) => {
            HandshakeFailure::ProtocolVersion(tls.to_string()).into()
        },
        rustls::Error::PeerIncompatible(
            reason @ (PeerIncompatible::Tls12NotOffered
            | PeerIncompatible::Tls12NotOfferedOrEnabled
            | PeerIncompatible::Tls13RequiredForQuic
            | PeerIncompatible::SupportedVersionsExtensionRequired
            | PeerIncompatible::ServerDoesNotSupportTls12Or13
            | PeerIncompatible::ServerTlsVersionIsDisabledByOurConfig),
        ) => HandshakeFailure::ProtocolVersion(format!("{reason:?}")).into(),
        other => HandshakeFailure::Tls(other.to_string()).into(),
    }
}

/// Classification plus policy decision shared by both verifiers.
#[derive(Debug)]
struct PeerCheck {
    policy: TrustPolicy,
    algorithms: WebPkiSupportedAlgorithms,
}

impl PeerCheck {
    fn new(policy: TrustPolicy, provider: &CryptoProvider) -> Self {
        Self { policy, algorithms: provider.signature_verification_algorithms }
    }

    /// `chain` runs WebPKI verification against the trust anchors, or is
    /// `None` when no anchors are configured.
    fn evaluate(
        &self,
        end_entity: &CertificateDer<'_>,
        expected: Option<&ExpectedName>,
        now: UnixTime,
        chain: Option<Result<(), rustls::Error>>,
    ) -> Result<(), rustls::Error> {
        let outcome = match certificate::inspect(end_entity, expected, now) {
            Some(failure) => failure,
            None => chain_outcome(chain, expected),
        };

        let hint = expected.map(ExpectedName::to_string);
        match self.policy.decide(&outcome, hint.as_deref()) {
            Verdict::Accept => Ok(()),
            Verdict::Reject(outcome) => Err(rustls::Error::InvalidCertificate(
                CertificateError::Other(OtherError(Arc::new(Rejection { outcome }))),
            )),
        }
    }

    fn verify_tls12(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

fn chain_outcome(
    chain: Option<Result<(), rustls::Error>>,
    expected: Option<&ExpectedName>,
) -> ValidationOutcome {
    let err = match chain {
        None => return ValidationOutcome::ChainError,
        Some(Ok(())) => return ValidationOutcome::Valid,
        Some(Err(err)) => err,
    };

    match err {
        rustls::Error::InvalidCertificate(cert_err) => match cert_err {
            // An issuer whose name matches an anchor but whose key does not
            // is just as untrusted as an unknown one.
            CertificateError::UnknownIssuer | CertificateError::BadSignature => {
                ValidationOutcome::ChainError
            },
            CertificateError::Expired => ValidationOutcome::Expired,
            CertificateError::NotValidYet => ValidationOutcome::NotYetValid,
            CertificateError::Revoked => ValidationOutcome::Revoked,
            CertificateError::BadEncoding => ValidationOutcome::Malformed("bad encoding".into()),
            CertificateError::NotValidForName => ValidationOutcome::NameMismatch {
                expected: expected.map(ExpectedName::to_string).unwrap_or_default(),
            },
            other => ValidationOutcome::Other(format!("{other:?}")),
        },
        other => ValidationOutcome::Other(other.to_string()),
    }
}

/// Client side: checks the certificate the server presents.
#[derive(Debug)]
struct ServerCertificateVerifier {
    check: PeerCheck,
    anchors: Option<Arc<WebPkiServerVerifier>>,
}

impl ServerCertVerifier for ServerCertificateVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let expected = ExpectedName::from_server_name(server_name);
        let chain = self.anchors.as_ref().map(|anchors| {
            anchors
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
                .map(|_| ())
        });

        self.check.evaluate(end_entity, expected.as_ref(), now, chain)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.check.verify_tls12(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.check.verify_tls13(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.check.schemes()
    }
}

/// Server side: requests and checks the client certificate.
#[derive(Debug)]
struct ClientCertificateVerifier {
    check: PeerCheck,
    anchors: Option<Arc<dyn ClientCertVerifier>>,
    expected_name: Option<ExpectedName>,
    mandatory: bool,
}

impl ClientCertVerifier for ClientCertificateVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        self.mandatory
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        let chain = self.anchors.as_ref().map(|anchors| {
            anchors.verify_client_cert(end_entity, intermediates, now).map(|_| ())
        });

        self.check.evaluate(end_entity, self.expected_name.as_ref(), now, chain)?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.check.verify_tls12(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.check.verify_tls13(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.check.schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_anchors_mean_chain_error() {
        assert_eq!(chain_outcome(None, None), ValidationOutcome::ChainError);
        assert_eq!(chain_outcome(Some(Ok(())), None), ValidationOutcome::Valid);
    }

    #[test]
    fn webpki_errors_map_to_outcomes() {
        let cases = [
            (CertificateError::UnknownIssuer, ValidationOutcome::ChainError),
            (CertificateError::BadSignature, ValidationOutcome::ChainError),
            (CertificateError::Expired, ValidationOutcome::Expired),
            (CertificateError::NotValidYet, ValidationOutcome::NotYetValid),
            (CertificateError::Revoked, ValidationOutcome::Revoked),
        ];
        for (err, expected) in cases {
            let outcome = chain_outcome(Some(Err(rustls::Error::InvalidCertificate(err))), None);
            assert_eq!(outcome, expected);
        }

        let name = ExpectedName::Dns("Server".into());
        let outcome = chain_outcome(
            Some(Err(rustls::Error::InvalidCertificate(CertificateError::NotValidForName))),
            Some(&name),
        );
        assert_eq!(outcome, ValidationOutcome::NameMismatch { expected: "Server".into() });
    }

    #[test]
    fn policy_rejection_survives_the_io_error_round_trip() {
        let check = PeerCheck::new(TrustPolicy::strict(), &rustls::crypto::ring::default_provider());
        let garbage = CertificateDer::from(vec![0u8; 4]);
        let tls_err = check.evaluate(&garbage, None, UnixTime::now(), None).unwrap_err();

        let err = handshake_error(io::Error::new(io::ErrorKind::InvalidData, tls_err));
        assert!(matches!(
            err,
            ChannelError::CertificateRejected { outcome: ValidationOutcome::Malformed(_) }
        ));
    }

    #[test]
    fn plain_io_failures_are_handshake_io() {
        let err = handshake_error(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(matches!(err, ChannelError::Handshake(HandshakeFailure::Io(_))));
    }

    #[test]
    fn version_incompatibilities_are_protocol_version_failures() {
        let version = handshake_error(io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::PeerIncompatible(PeerIncompatible::Tls12NotOfferedOrEnabled),
        ));
        assert!(matches!(version, ChannelError::Handshake(HandshakeFailure::ProtocolVersion(_))));

        let other = handshake_error(io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::PeerIncompatible(PeerIncompatible::NoCipherSuitesInCommon),
        ));
        assert!(matches!(other, ChannelError::Handshake(HandshakeFailure::Tls(_))));
    }

    #[test]
    fn missing_client_certificate_is_reported() {
        let err = handshake_error(io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::NoCertificatesPresented,
        ));
        assert!(matches!(err, ChannelError::Handshake(HandshakeFailure::MissingPeerCertificate)));
    }
}
