//! Trust-domain routing and proxying.

use axum::http::StatusCode;
use ca_gateway::net::EndpointKind;

mod common;

async fn gateway_with_backends() -> common::TestGateway {
    let mut config = common::test_config();
    config.upstreams.insert("ca_api".into(), common::start_echo_backend("ca_api").await.to_string());
    config.upstreams.insert("ocsp".into(), common::start_echo_backend("ocsp").await.to_string());
    config.upstreams.insert("scep".into(), common::start_echo_backend("scep").await.to_string());
    common::start_gateway(config).await
}

async fn get(gateway: &common::TestGateway, path: &str) -> (StatusCode, String) {
    let res = common::client()
        .get(gateway.url(EndpointKind::Plaintext, path))
        .send()
        .await
        .unwrap();
    (res.status(), res.text().await.unwrap())
}

#[tokio::test]
async fn longest_prefix_wins() {
    let gateway = gateway_with_backends().await;

    let (status, body) = get(&gateway, "/api/ocsp/MEMwQTA").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("ocsp\n"), "{body}");

    let (status, body) = get(&gateway, "/api/certificates").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("ca_api\n"), "{body}");

    gateway.stop().await;
}

#[tokio::test]
async fn legacy_scep_path_is_rewritten() {
    let gateway = gateway_with_backends().await;

    let (status, legacy) = get(&gateway, "/cgi-bin/pkiclient.exe?operation=GetCACert").await;
    assert_eq!(status, StatusCode::OK);
    let (_, direct) = get(&gateway, "/api/scep/?operation=GetCACert").await;

    assert!(legacy.starts_with("scep\nget /api/scep/?operation=getcacert http/1.1"), "{legacy}");
    assert_eq!(legacy.lines().nth(1), direct.lines().nth(1));

    gateway.stop().await;
}

#[tokio::test]
async fn identity_headers_come_from_the_connection() {
    let gateway = gateway_with_backends().await;

    let res = common::client()
        .get(gateway.url(EndpointKind::Plaintext, "/api/whoami"))
        .header("x-forwarded-for", "198.51.100.9")
        .header("x-real-ip", "198.51.100.9")
        .header("x-ssl-verify", "SUCCESS")
        .header("x-ssl-client-dn", "CN=admin")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let head = res.text().await.unwrap();

    assert!(head.contains("host: ca.test"), "{head}");
    assert!(head.contains("x-forwarded-for: 127.0.0.1"), "{head}");
    assert!(head.contains("x-real-ip: 127.0.0.1"), "{head}");
    assert!(head.contains("x-forwarded-proto: http"), "{head}");
    assert!(head.contains("x-ssl-verify: none"), "{head}");
    assert!(!head.contains("198.51.100.9"), "{head}");
    assert!(!head.contains("cn=admin"), "{head}");
    assert!(head.contains("x-request-id: "), "{head}");

    gateway.stop().await;
}

#[tokio::test]
async fn request_id_is_echoed() {
    let gateway = gateway_with_backends().await;

    let res = common::client()
        .get(gateway.url(EndpointKind::Plaintext, "/api/x"))
        .header("x-request-id", "trace-42")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "trace-42");
    assert!(res.text().await.unwrap().contains("x-request-id: trace-42"));

    gateway.stop().await;
}

#[tokio::test]
async fn unreachable_upstream_serves_failure_document() {
    let mut config = common::test_config();
    config.upstreams.insert("crl".into(), common::closed_port().await.to_string());
    let gateway = common::start_gateway(config).await;

    let res = common::client()
        .get(gateway.url(EndpointKind::Plaintext, "/api/revoked/latest.crl"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(res.headers()["content-type"], "application/json");
    let doc: serde_json::Value = res.json().await.unwrap();
    assert_eq!(doc["error"], "upstream_unavailable");

    gateway.stop().await;
}

#[tokio::test]
async fn plaintext_catch_all_redirects_to_https() {
    let gateway = gateway_with_backends().await;

    let res = common::client()
        .get(gateway.url(EndpointKind::Plaintext, "/enroll?device=7"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(res.headers()["location"], "https://ca.test/enroll?device=7");

    gateway.stop().await;
}

#[tokio::test]
async fn auxiliary_services_are_not_public_plaintext() {
    let mut config = common::test_config();
    config.upstreams.insert("ca_api".into(), common::start_echo_backend("ca_api").await.to_string());
    config.upstreams.insert("builder".into(), common::start_echo_backend("builder").await.to_string());
    let gateway = common::start_gateway(config).await;

    // The builder route is TLS-only, so plaintext falls back to the core API prefix.
    let (status, body) = get(&gateway, "/api/builder/images").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("ca_api\n"), "{body}");

    gateway.stop().await;
}
