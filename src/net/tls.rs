//! TLS configuration and certificate loading.
//!
//! # Responsibilities
//! - Load the server chain/key and the client trust root from PEM
//! - Build the public-TLS and mutual-TLS server configs
//! - Apply the invalid-client-certificate policy
//! - Keep the mutual-TLS OCSP staple fresh
//!
//! # Design Decisions
//! - Explicit aws-lc-rs provider, no process-wide default required
//! - Optional client auth: absence of a certificate never fails a handshake
//! - Staple refresh is out of band; a stale staple is dropped, not fatal

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, CertificateRevocationListDer, PrivateKeyDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::{ClientHello, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use rustls::{DigitallySignedStruct, DistinguishedName, RootCertStore, ServerConfig, SignatureScheme};
use thiserror::Error;
use tokio_rustls::TlsAcceptor;

use crate::config::GatewayConfig;
use crate::lifecycle::Shutdown;
use crate::net::EndpointKind;
use crate::security::client_cert::ClientCertificate;

/// Error type for TLS material loading.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in '{0}'")]
    NoCertificates(String),

    #[error("no private key found in '{0}'")]
    NoPrivateKey(String),

    #[error("client verifier: {0}")]
    Verifier(String),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

fn alpn() -> Vec<Vec<u8>> {
    vec![b"h2".to_vec(), b"http/1.1".to_vec()]
}

fn open(path: &str) -> Result<BufReader<File>, TlsError> {
    File::open(path).map(BufReader::new).map_err(|source| TlsError::Io {
        path: path.to_string(),
        source,
    })
}

/// Load all certificates from a PEM file.
pub fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_string()));
    }
    Ok(certs)
}

/// Load the first private key from a PEM file.
pub fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|source| TlsError::Io {
            path: path.to_string(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_string()))
}

fn load_crls(path: &str) -> Result<Vec<CertificateRevocationListDer<'static>>, TlsError> {
    rustls_pemfile::crls(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_string(),
            source,
        })
}

/// Client verifier that can let an invalid chain through the handshake so the
/// failure is reported downstream instead.
#[derive(Debug)]
struct ReportingClientVerifier {
    inner: Arc<dyn ClientCertVerifier>,
    reject_invalid: bool,
}

impl ClientCertVerifier for ReportingClientVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        match self.inner.verify_client_cert(end_entity, intermediates, now) {
            Ok(verified) => Ok(verified),
            Err(e) if self.reject_invalid => Err(e),
            Err(e) => {
                tracing::debug!(error = %e, "Client certificate did not verify, reporting downstream");
                Ok(ClientCertVerified::assertion())
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Certificate resolver whose OCSP staple can be swapped at runtime.
pub struct StaplingResolver {
    current: ArcSwap<CertifiedKey>,
}

impl std::fmt::Debug for StaplingResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaplingResolver")
            .field("stapled", &self.current.load().ocsp.is_some())
            .finish()
    }
}

/// Result of one staple refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StapleStatus {
    Loaded(usize),
    Missing,
    Stale,
}

impl StaplingResolver {
    pub fn new(key: CertifiedKey) -> Self {
        Self {
            current: ArcSwap::from_pointee(key),
        }
    }

    /// Replace the stapled OCSP response (`None` omits the staple).
    pub fn set_staple(&self, staple: Option<Vec<u8>>) {
        let mut key = CertifiedKey::clone(&self.current.load());
        key.ocsp = staple;
        self.current.store(Arc::new(key));
    }

    /// Currently stapled response.
    pub fn staple(&self) -> Option<Vec<u8>> {
        self.current.load().ocsp.clone()
    }

    /// Re-read a DER OCSP response from disk.
    pub async fn refresh_from_file(&self, path: &Path, max_age: Duration) -> StapleStatus {
        let status = match tokio::fs::metadata(path).await {
            Err(_) => StapleStatus::Missing,
            Ok(meta) => {
                let age = meta
                    .modified()
                    .ok()
                    .and_then(|m| SystemTime::now().duration_since(m).ok())
                    .unwrap_or_default();
                if age > max_age {
                    StapleStatus::Stale
                } else {
                    match tokio::fs::read(path).await {
                        Ok(bytes) if !bytes.is_empty() => {
                            let len = bytes.len();
                            self.set_staple(Some(bytes));
                            StapleStatus::Loaded(len)
                        }
                        _ => StapleStatus::Missing,
                    }
                }
            }
        };
        if !matches!(status, StapleStatus::Loaded(_)) {
            self.set_staple(None);
        }
        status
    }
}

impl ResolvesServerCert for StaplingResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.current.load_full())
    }
}

/// Server-side TLS state for the public and mutual-TLS endpoints.
#[derive(Clone)]
pub struct TlsMaterials {
    public: Option<Arc<ServerConfig>>,
    mutual: Option<Arc<ServerConfig>>,
    client_verifier: Option<Arc<dyn ClientCertVerifier>>,
    stapler: Option<Arc<StaplingResolver>>,
}

impl TlsMaterials {
    /// Materials for a gateway with no TLS endpoints.
    pub fn none() -> Self {
        Self {
            public: None,
            mutual: None,
            client_verifier: None,
            stapler: None,
        }
    }

    /// Load everything the enabled TLS endpoints need.
    pub fn load(config: &GatewayConfig) -> Result<Self, TlsError> {
        let want_public = config.endpoints.tls.is_some();
        let want_mutual = config.endpoints.mutual_tls.is_some();
        if !want_public && !want_mutual {
            return Ok(Self::none());
        }

        let provider = provider();
        let cert_path = config.server_cert_path();
        let certs = load_certs(&cert_path)?;
        let key = load_private_key(&config.server_key_path())?;

        tracing::info!(
            cert = %cert_path,
            managed = config.use_managed_certificates,
            "Server certificate loaded"
        );

        let public = if want_public {
            let mut tls = ServerConfig::builder_with_provider(provider.clone())
                .with_safe_default_protocol_versions()?
                .with_no_client_auth()
                .with_single_cert(certs.clone(), key.clone_key())?;
            tls.alpn_protocols = alpn();
            Some(Arc::new(tls))
        } else {
            None
        };

        let (mutual, client_verifier, stapler) = if want_mutual {
            let mut roots = RootCertStore::empty();
            for ca in load_certs(&config.tls.client_ca_path)? {
                roots.add(ca)?;
            }
            let mut builder =
                WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
                    .allow_unauthenticated();
            if let Some(crl_path) = &config.tls.client_crl_path {
                builder = builder.with_crls(load_crls(crl_path)?);
            }
            let inner = builder
                .build()
                .map_err(|e| TlsError::Verifier(e.to_string()))?;

            let signing_key = provider.key_provider.load_private_key(key)?;
            let stapler = Arc::new(StaplingResolver::new(CertifiedKey::new(certs, signing_key)));

            let verifier = Arc::new(ReportingClientVerifier {
                inner: inner.clone(),
                reject_invalid: config.tls.reject_invalid_client_certs,
            });
            let mut tls = ServerConfig::builder_with_provider(provider)
                .with_safe_default_protocol_versions()?
                .with_client_cert_verifier(verifier)
                .with_cert_resolver(stapler.clone());
            tls.alpn_protocols = alpn();

            tracing::info!(
                trust_root = %config.tls.client_ca_path,
                reject_invalid = config.tls.reject_invalid_client_certs,
                "Mutual TLS configured"
            );
            (Some(Arc::new(tls)), Some(inner), Some(stapler))
        } else {
            (None, None, None)
        };

        Ok(Self {
            public,
            mutual,
            client_verifier,
            stapler,
        })
    }

    /// Acceptor for a TLS endpoint; `None` for plaintext endpoints.
    pub fn acceptor(&self, kind: EndpointKind) -> Option<TlsAcceptor> {
        let config = match kind {
            EndpointKind::Tls => self.public.clone(),
            EndpointKind::MutualTls => self.mutual.clone(),
            EndpointKind::Plaintext | EndpointKind::LoopbackPublish => None,
        };
        config.map(TlsAcceptor::from)
    }

    /// Report on the chain a client presented on the mutual-TLS endpoint.
    pub fn client_report(&self, chain: Option<&[CertificateDer<'_>]>) -> Option<ClientCertificate> {
        let verifier = self.client_verifier.as_deref()?;
        ClientCertificate::inspect(verifier, chain)
    }

    /// The mutual-TLS certificate resolver, when that endpoint is enabled.
    pub fn stapler(&self) -> Option<Arc<StaplingResolver>> {
        self.stapler.clone()
    }
}

/// Periodically reload the OCSP staple until shutdown.
pub fn spawn_staple_refresh(
    stapler: Arc<StaplingResolver>,
    path: PathBuf,
    every: Duration,
    max_age: Duration,
    shutdown: Shutdown,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        let stop = shutdown.wait();
        tokio::pin!(stop);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match stapler.refresh_from_file(&path, max_age).await {
                        StapleStatus::Loaded(len) => {
                            tracing::debug!(path = ?path, bytes = len, "OCSP staple refreshed");
                        }
                        status => {
                            tracing::warn!(path = ?path, ?status, "OCSP staple unavailable, handshakes proceed without it");
                        }
                    }
                }
                _ = &mut stop => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn certified_key() -> CertifiedKey {
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["localhost".into()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        let der = PrivateKeyDer::try_from(key.serialize_der()).unwrap();
        let signing = provider().key_provider.load_private_key(der).unwrap();
        CertifiedKey::new(vec![cert.der().clone()], signing)
    }

    #[tokio::test]
    async fn staple_follows_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ocsp.der");
        let stapler = StaplingResolver::new(certified_key());
        let max_age = Duration::from_secs(3600);

        assert_eq!(stapler.refresh_from_file(&path, max_age).await, StapleStatus::Missing);
        assert_eq!(stapler.staple(), None);

        std::fs::write(&path, [0x30, 0x03, 0x0a, 0x01, 0x00]).unwrap();
        assert_eq!(stapler.refresh_from_file(&path, max_age).await, StapleStatus::Loaded(5));
        assert_eq!(stapler.staple().map(|s| s.len()), Some(5));

        std::fs::write(&path, []).unwrap();
        assert_eq!(stapler.refresh_from_file(&path, max_age).await, StapleStatus::Missing);
        assert_eq!(stapler.staple(), None);
    }

    #[tokio::test]
    async fn stale_staple_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ocsp.der");
        std::fs::write(&path, [1, 2, 3]).unwrap();
        let stapler = StaplingResolver::new(certified_key());

        stapler.set_staple(Some(vec![9]));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let status = stapler.refresh_from_file(&path, Duration::from_millis(1)).await;

        assert_eq!(status, StapleStatus::Stale);
        assert_eq!(stapler.staple(), None);
    }

    #[test]
    fn no_tls_endpoints_need_no_files() {
        let mut config = GatewayConfig::default();
        config.endpoints.tls = None;
        config.endpoints.mutual_tls = None;
        let materials = TlsMaterials::load(&config).unwrap();
        assert!(materials.acceptor(EndpointKind::Tls).is_none());
        assert!(materials.stapler().is_none());
    }

    #[test]
    fn missing_certificate_file_is_reported() {
        let mut config = GatewayConfig::default();
        config.tls.cert_path = "/nonexistent/server.pem".into();
        let err = TlsMaterials::load(&config).err().unwrap();
        assert!(matches!(err, TlsError::Io { .. }), "{err}");
    }
}
