//! TLS and mutual-TLS endpoints.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ca_gateway::net::EndpointKind;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

mod common;

struct Authority {
    cert: Certificate,
    key: KeyPair,
}

impl Authority {
    fn new(name: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, name);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    fn issue(&self, params: CertificateParams) -> (Certificate, KeyPair) {
        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        (cert, key)
    }

    fn server(&self) -> (Certificate, KeyPair) {
        let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        self.issue(params)
    }

    fn client(&self, common_name: &str) -> (Certificate, KeyPair) {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        self.issue(params)
    }
}

struct TlsGateway {
    gateway: common::TestGateway,
    ca: Authority,
    _dir: tempfile::TempDir,
}

async fn start_tls_gateway(reject_invalid: bool) -> TlsGateway {
    let ca = Authority::new("Gateway Test CA");
    let (server_cert, server_key) = ca.server();

    let dir = tempfile::tempdir().unwrap();
    let write = |name: &str, contents: String| {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path.to_str().unwrap().to_string()
    };

    let mut config = common::test_config();
    config.endpoints.tls = Some("127.0.0.1:0".into());
    config.endpoints.mutual_tls = Some("127.0.0.1:0".into());
    config.tls.cert_path = write("server.pem", server_cert.pem());
    config.tls.key_path = write("server.key", server_key.serialize_pem());
    config.tls.client_ca_path = write("ca.pem", ca.cert.pem());
    config.tls.reject_invalid_client_certs = reject_invalid;
    config
        .upstreams
        .insert("ca_api".into(), common::start_echo_backend("ca_api").await.to_string());

    let gateway = common::start_gateway(config).await;
    TlsGateway {
        gateway,
        ca,
        _dir: dir,
    }
}

fn connector(ca: &Authority, identity: Option<(Certificate, KeyPair)>) -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.add(ca.cert.der().clone()).unwrap();

    let builder = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots);
    let config = match identity {
        Some((cert, key)) => {
            let chain: Vec<CertificateDer<'static>> = vec![cert.der().clone()];
            let key = PrivateKeyDer::try_from(key.serialize_der()).unwrap();
            builder.with_client_auth_cert(chain, key).unwrap()
        }
        None => builder.with_no_client_auth(),
    };
    TlsConnector::from(Arc::new(config))
}

/// Send one request over TLS. `None` when the gateway refused the session.
async fn request(connector: &TlsConnector, addr: SocketAddr, path: &str) -> Option<String> {
    let tcp = TcpStream::connect(addr).await.unwrap();
    let name = ServerName::try_from("localhost").unwrap();
    let mut tls = connector.connect(name, tcp).await.ok()?;

    let head = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    tls.write_all(head.as_bytes()).await.ok()?;

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), tls.read_to_end(&mut response))
        .await
        .ok()?
        .ok()?;
    let text = String::from_utf8_lossy(&response).to_string();
    text.starts_with("HTTP/1.1 ").then_some(text)
}

fn write_pem(path: &Path, pem: &str) {
    std::fs::write(path, pem).unwrap();
}

#[tokio::test]
async fn public_tls_endpoint_sets_hsts() {
    let tls = start_tls_gateway(false).await;
    let addr = tls.gateway.addr(EndpointKind::Tls);

    let response = request(&connector(&tls.ca, None), addr, "/api/status").await.unwrap();
    let lower = response.to_ascii_lowercase();
    assert!(lower.contains("strict-transport-security: max-age=15768000"), "{response}");
    assert!(lower.contains("x-forwarded-proto: https"), "{response}");
    assert!(lower.contains("x-ssl-verify: none"), "{response}");

    tls.gateway.stop().await;
}

#[tokio::test]
async fn mutual_tls_without_certificate_is_served() {
    let tls = start_tls_gateway(false).await;
    let addr = tls.gateway.addr(EndpointKind::MutualTls);

    let response = request(&connector(&tls.ca, None), addr, "/api/status").await.unwrap();
    let lower = response.to_ascii_lowercase();
    assert!(lower.contains("x-ssl-verify: none"), "{response}");
    assert!(!lower.contains("strict-transport-security"), "{response}");

    tls.gateway.stop().await;
}

#[tokio::test]
async fn trusted_client_certificate_is_forwarded() {
    let tls = start_tls_gateway(false).await;
    let addr = tls.gateway.addr(EndpointKind::MutualTls);
    let identity = tls.ca.client("device-17");

    let response = request(&connector(&tls.ca, Some(identity)), addr, "/api/whoami")
        .await
        .unwrap();
    let lower = response.to_ascii_lowercase();
    assert!(lower.contains("x-ssl-verify: success"), "{response}");
    assert!(lower.contains("x-ssl-client-dn: cn=device-17"), "{response}");
    assert!(lower.contains("x-ssl-cert: -----begin%20certificate-----"), "{response}");

    tls.gateway.stop().await;
}

#[tokio::test]
async fn untrusted_client_certificate_is_reported() {
    let tls = start_tls_gateway(false).await;
    let addr = tls.gateway.addr(EndpointKind::MutualTls);
    let stranger = Authority::new("Someone Else").client("intruder");

    let response = request(&connector(&tls.ca, Some(stranger)), addr, "/api/whoami")
        .await
        .unwrap();
    let lower = response.to_ascii_lowercase();
    assert!(lower.contains("x-ssl-verify: failed:"), "{response}");
    assert!(lower.contains("x-ssl-client-dn: cn=intruder"), "{response}");

    tls.gateway.stop().await;
}

#[tokio::test]
async fn untrusted_client_certificate_can_be_refused() {
    let tls = start_tls_gateway(true).await;
    let addr = tls.gateway.addr(EndpointKind::MutualTls);
    let stranger = Authority::new("Someone Else").client("intruder");

    let response = request(&connector(&tls.ca, Some(stranger)), addr, "/api/whoami").await;
    assert!(response.is_none(), "{response:?}");

    // Clients without a certificate are still served.
    assert!(request(&connector(&tls.ca, None), addr, "/api/status").await.is_some());

    tls.gateway.stop().await;
}

#[tokio::test]
async fn bad_certificate_file_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let cert = dir.path().join("server.pem");
    write_pem(&cert, "not a certificate");

    let mut config = common::test_config();
    config.endpoints.tls = Some("127.0.0.1:0".into());
    config.tls.cert_path = cert.to_str().unwrap().to_string();

    let result = ca_gateway::GatewayServer::bind(config, ca_gateway::Shutdown::new()).await;
    assert!(result.is_err());
}
