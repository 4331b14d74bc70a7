//! Client certificate reports.
//!
//! The gateway verifies a presented client chain against its trust root but
//! leaves authorization to the upstreams. What it learned during the handshake
//! is captured here and forwarded as headers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::danger::ClientCertVerifier;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

/// Everything but RFC 3986 unreserved characters is escaped.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Outcome of verifying a presented client certificate chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientVerification {
    Success,
    Failed(String),
}

impl ClientVerification {
    /// Value of the `X-SSL-Verify` header.
    pub fn header_value(&self) -> String {
        match self {
            ClientVerification::Success => "SUCCESS".to_string(),
            ClientVerification::Failed(reason) => format!("FAILED:{}", sanitize(reason)),
        }
    }
}

/// A client certificate presented on a TLS connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCertificate {
    pub verification: ClientVerification,
    /// End-entity certificate in PEM form.
    pub pem: String,
    /// Subject DN, when the certificate parses.
    pub subject: Option<String>,
}

impl ClientCertificate {
    /// Build a report for a presented chain, verifying it with `verifier`.
    ///
    /// Returns `None` when the client presented nothing.
    pub fn inspect(
        verifier: &dyn ClientCertVerifier,
        chain: Option<&[CertificateDer<'_>]>,
    ) -> Option<Self> {
        let (end_entity, intermediates) = chain?.split_first()?;

        let verification = match verifier.verify_client_cert(end_entity, intermediates, UnixTime::now()) {
            Ok(_) => ClientVerification::Success,
            Err(e) => ClientVerification::Failed(e.to_string()),
        };

        Some(Self {
            verification,
            pem: to_pem(end_entity.as_ref()),
            subject: subject_dn(end_entity.as_ref()),
        })
    }

    /// PEM percent-encoded as a URI component, as `$ssl_client_escaped_cert`
    /// does. Spaces become `%20`, never `+`.
    pub fn escaped_pem(&self) -> String {
        utf8_percent_encode(&self.pem, URI_COMPONENT).to_string()
    }
}

/// Value of `X-SSL-Verify` for an optional report.
pub fn verify_header(cert: Option<&ClientCertificate>) -> String {
    cert.map(|c| c.verification.header_value())
        .unwrap_or_else(|| "NONE".to_string())
}

fn to_pem(der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut pem = String::with_capacity(encoded.len() + encoded.len() / 64 + 64);
    pem.push_str("-----BEGIN CERTIFICATE-----\n");
    for line in encoded.as_bytes().chunks(64) {
        // base64 output is ASCII
        pem.push_str(std::str::from_utf8(line).unwrap_or_default());
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

fn subject_dn(der: &[u8]) -> Option<String> {
    X509Certificate::from_der(der)
        .ok()
        .map(|(_, cert)| sanitize(&cert.subject().to_string()))
}

/// Header values cannot carry control characters.
fn sanitize(value: &str) -> String {
    value.chars().filter(|c| !c.is_control()).collect()
}
