//! X.509 inspection: subjects, names and validity windows.

use std::{fmt, net::IpAddr};

use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use x509_parser::{certificate::X509Certificate, extensions::GeneralName, parse_x509_certificate};

use crate::trust::ValidationOutcome;

/// Certificate presented by the remote party during the handshake.
///
/// Lives only as long as the [`crate::SecureChannel`] that received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCertificate {
    der: CertificateDer<'static>,
    subject: String,
}

impl PeerCertificate {
    pub(crate) fn from_der(der: CertificateDer<'static>) -> Result<Self, String> {
        let subject = subject_of(&der)?;
        Ok(Self { der, subject })
    }

    /// Distinguished name of the certificate subject, e.g. `CN=Server`.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// DER encoding of the certificate.
    pub fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }
}

/// Render the subject distinguished name of a DER certificate.
pub(crate) fn subject_of(der: &CertificateDer<'_>) -> Result<String, String> {
    let (_, cert) = parse_x509_certificate(der.as_ref()).map_err(|e| e.to_string())?;
    Ok(cert.subject().to_string())
}

/// Name a peer certificate is checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ExpectedName {
    Dns(String),
    Ip(IpAddr),
}

impl ExpectedName {
    pub(crate) fn from_server_name(name: &ServerName<'_>) -> Option<Self> {
        match name {
            ServerName::DnsName(dns) => Some(Self::Dns(dns.as_ref().to_string())),
            ServerName::IpAddress(ip) => Some(Self::Ip(IpAddr::from(*ip))),
            _ => None,
        }
    }

    pub(crate) fn from_hint(hint: &str) -> Self {
        match hint.parse::<IpAddr>() {
            Ok(ip) => Self::Ip(ip),
            Err(_) => Self::Dns(hint.to_string()),
        }
    }
}

impl fmt::Display for ExpectedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dns(name) => f.write_str(name),
            Self::Ip(ip) => write!(f, "{ip}"),
        }
    }
}

/// Run every check that does not depend on the issuer chain.
///
/// Returns `None` when the certificate passes, otherwise the first failing
/// outcome in order: malformed, validity window, name.
pub(crate) fn inspect(
    end_entity: &CertificateDer<'_>,
    expected: Option<&ExpectedName>,
    now: UnixTime,
) -> Option<ValidationOutcome> {
    let cert = match parse_x509_certificate(end_entity.as_ref()) {
        Ok((_, cert)) => cert,
        Err(e) => return Some(ValidationOutcome::Malformed(e.to_string())),
    };

    let now = i64::try_from(now.as_secs()).unwrap_or(i64::MAX);
    let validity = cert.validity();
    if now < validity.not_before.timestamp() {
        return Some(ValidationOutcome::NotYetValid);
    }
    if now > validity.not_after.timestamp() {
        return Some(ValidationOutcome::Expired);
    }

    if let Some(expected) = expected {
        match matches_name(&cert, expected) {
            Ok(true) => {},
            Ok(false) => {
                return Some(ValidationOutcome::NameMismatch { expected: expected.to_string() });
            },
            Err(reason) => return Some(ValidationOutcome::Malformed(reason)),
        }
    }

    None
}

/// DNS names match a DNS subject alternative name; when the certificate
/// carries no DNS SAN the subject common names are used instead. IP addresses
/// only match IP SANs. Comparison is ASCII case-insensitive.
fn matches_name(cert: &X509Certificate<'_>, expected: &ExpectedName) -> Result<bool, String> {
    let san = cert.subject_alternative_name().map_err(|e| e.to_string())?;
    let names = san.map(|ext| ext.value.general_names.as_slice()).unwrap_or_default();

    match expected {
        ExpectedName::Dns(wanted) => {
            let mut dns_sans = names
                .iter()
                .filter_map(|n| match n {
                    GeneralName::DNSName(dns) => Some(*dns),
                    _ => None,
                })
                .peekable();
            if dns_sans.peek().is_some() {
                return Ok(dns_sans.any(|d| d.eq_ignore_ascii_case(wanted)));
            }
            Ok(cert
                .subject()
                .iter_common_name()
                .filter_map(|cn| cn.as_str().ok())
                .any(|cn| cn.eq_ignore_ascii_case(wanted)))
        },
        ExpectedName::Ip(wanted) => Ok(names.iter().any(|n| match n {
            GeneralName::IPAddress(bytes) => ip_from_bytes(bytes) == Some(*wanted),
            _ => false,
        })),
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}
