//! Backend proxy client.
//!
//! # Responsibilities
//! - Forward a request to a named upstream over a pooled HTTP/1.1 client
//! - Rewrite identity headers from the connection context
//! - Apply connect and response-head deadlines
//! - Turn every upstream failure into a `GatewayError` (never retried)

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Version};
use axum::response::Response;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::http::response::from_upstream;
use crate::net::ConnectionContext;
use crate::observability::metrics;
use crate::proxy::upstream::UpstreamRegistry;
use crate::security::headers::apply_forwarded_headers;

/// Forwards requests to upstream services.
#[derive(Clone)]
pub struct ProxyClient {
    client: Client<HttpConnector, Body>,
    upstreams: UpstreamRegistry,
    canonical_host: String,
    response_timeout: Duration,
}

impl ProxyClient {
    pub fn new(config: &GatewayConfig, upstreams: UpstreamRegistry) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.upstream_connect_secs)));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            upstreams,
            canonical_host: config.canonical_host.clone(),
            response_timeout: Duration::from_secs(config.timeouts.upstream_response_secs),
        }
    }

    pub fn upstreams(&self) -> &UpstreamRegistry {
        &self.upstreams
    }

    /// Forward `request` to `upstream` at `path_and_query`.
    pub async fn forward(
        &self,
        upstream: &str,
        path_and_query: &str,
        request: Request<Body>,
        ctx: &ConnectionContext,
    ) -> Result<Response, GatewayError> {
        let target = self.upstreams.get(upstream).ok_or_else(|| GatewayError::UpstreamUnavailable {
            upstream: upstream.to_string(),
            reason: "not configured".to_string(),
        })?;
        let guard = target.begin();

        let (mut parts, body) = request.into_parts();
        parts.uri = guard
            .uri_for(path_and_query)
            .map_err(|e| self.failed(upstream, e.to_string()))?;
        parts.version = Version::HTTP_11;
        apply_forwarded_headers(&mut parts.headers, ctx, &self.canonical_host);

        tracing::debug!(
            upstream = %upstream,
            addr = %guard.addr,
            uri = %parts.uri,
            in_flight = guard.in_flight(),
            "Forwarding request"
        );

        let request = Request::from_parts(parts, body);
        match tokio::time::timeout(self.response_timeout, self.client.request(request)).await {
            Ok(Ok(response)) => Ok(from_upstream(response)),
            Ok(Err(e)) => {
                let reason = match std::error::Error::source(&e) {
                    Some(source) => format!("{e}: {source}"),
                    None => e.to_string(),
                };
                Err(self.failed(upstream, reason))
            }
            Err(_) => {
                metrics::record_upstream_failure(upstream);
                Err(GatewayError::UpstreamTimeout {
                    upstream: upstream.to_string(),
                    secs: self.response_timeout.as_secs(),
                })
            }
        }
    }

    fn failed(&self, upstream: &str, reason: String) -> GatewayError {
        metrics::record_upstream_failure(upstream);
        GatewayError::UpstreamUnavailable {
            upstream: upstream.to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::EndpointKind;
    use std::collections::BTreeMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn client_for(upstreams: BTreeMap<String, String>, response_secs: u64) -> ProxyClient {
        let mut config = GatewayConfig::default();
        config.timeouts.upstream_response_secs = response_secs;
        config.canonical_host = "ca.example.com".into();
        ProxyClient::new(&config, UpstreamRegistry::from_config(&upstreams).unwrap())
    }

    fn ctx() -> ConnectionContext {
        ConnectionContext::new(EndpointKind::Plaintext, "203.0.113.5:5555".parse().unwrap())
    }

    #[tokio::test]
    async fn unknown_upstream_is_unavailable() {
        let client = client_for(BTreeMap::new(), 5);
        let err = client
            .forward("ocsp", "/", Request::new(Body::empty()), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnavailable { .. }));
    }

    #[tokio::test]
    async fn refused_connection_is_unavailable() {
        // Bind then drop to get a port nothing listens on.
        let port = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap().port();
        let mut upstreams = BTreeMap::new();
        upstreams.insert("crl".to_string(), format!("127.0.0.1:{port}"));
        let client = client_for(upstreams, 5);

        let err = client
            .forward("crl", "/api/revoked/", Request::new(Body::empty()), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnavailable { .. }), "{err}");
    }

    #[tokio::test]
    async fn silent_upstream_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut upstreams = BTreeMap::new();
        upstreams.insert("ca_api".to_string(), addr.to_string());
        let mut client = client_for(upstreams, 1);
        client.response_timeout = Duration::from_millis(200);

        let err = client
            .forward("ca_api", "/api/", Request::new(Body::empty()), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamTimeout { .. }), "{err}");
    }

    #[tokio::test]
    async fn request_reaches_upstream_with_forwarded_headers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let _ = seen_tx.send(String::from_utf8_lossy(&buf[..n]).to_string());
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                .await
                .unwrap();
        });

        let mut upstreams = BTreeMap::new();
        upstreams.insert("ocsp".to_string(), addr.to_string());
        let client = client_for(upstreams, 5);

        let request = Request::builder()
            .uri("/api/ocsp/abc")
            .header("x-forwarded-for", "10.0.0.1")
            .body(Body::empty())
            .unwrap();
        let response = client
            .forward("ocsp", "/api/ocsp/abc?x=1", request, &ctx())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let head = seen_rx.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("get /api/ocsp/abc?x=1 http/1.1"), "{head}");
        assert!(head.contains("host: ca.example.com"), "{head}");
        assert!(head.contains("x-forwarded-for: 203.0.113.5"), "{head}");
        assert!(!head.contains("10.0.0.1"), "{head}");
        assert!(head.contains("x-ssl-verify: none"), "{head}");
    }
}
