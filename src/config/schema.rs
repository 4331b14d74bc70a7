//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::net::EndpointKind;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Hostname the gateway answers for. Forwarded to upstreams as `Host`
    /// and used to build HTTPS redirects.
    pub canonical_host: String,

    /// Subscribe paths are proxied to an external push server and the
    /// loopback publish endpoint is not started.
    pub push_server_external: bool,

    /// Server certificate comes from the ACME client's live directory.
    pub use_managed_certificates: bool,

    /// Listening endpoints.
    pub endpoints: EndpointsConfig,

    /// Per-address connection ceilings.
    pub limits: LimitsConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// TLS materials and client certificate policy.
    pub tls: TlsConfig,

    /// Upstream services by name (`name = "host:port"`).
    #[serde(default = "default_upstreams")]
    pub upstreams: BTreeMap<String, String>,

    /// Path prefix table.
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteConfig>,

    /// Legacy path rewrites applied before routing.
    #[serde(default = "default_rewrites")]
    pub rewrites: Vec<RewriteConfig>,

    /// Channel broker settings.
    pub broker: BrokerConfig,

    /// Security hardening.
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            canonical_host: "localhost".to_string(),
            push_server_external: false,
            use_managed_certificates: false,
            endpoints: EndpointsConfig::default(),
            limits: LimitsConfig::default(),
            timeouts: TimeoutConfig::default(),
            tls: TlsConfig::default(),
            upstreams: default_upstreams(),
            routes: default_routes(),
            rewrites: default_rewrites(),
            broker: BrokerConfig::default(),
            security: SecurityConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Path of the server certificate chain, honouring managed certificates.
    pub fn server_cert_path(&self) -> String {
        if self.use_managed_certificates {
            format!("{}/{}/fullchain.pem", self.tls.acme_live_dir, self.canonical_host)
        } else {
            self.tls.cert_path.clone()
        }
    }

    /// Path of the server private key, honouring managed certificates.
    pub fn server_key_path(&self) -> String {
        if self.use_managed_certificates {
            format!("{}/{}/privkey.pem", self.tls.acme_live_dir, self.canonical_host)
        } else {
            self.tls.key_path.clone()
        }
    }

    /// Whether the in-process broker accepts publishes.
    pub fn publish_enabled(&self) -> bool {
        !self.push_server_external && self.endpoints.publish.is_some()
    }
}

/// Listening endpoint addresses. `None` disables the endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointsConfig {
    /// Public plaintext (OCSP, CRL, SCEP, bootstrap redirects).
    pub plaintext: Option<String>,

    /// Public server-authenticated TLS (web interface).
    pub tls: Option<String>,

    /// TLS with optional client certificate.
    pub mutual_tls: Option<String>,

    /// Loopback-only publish endpoint.
    pub publish: Option<String>,

    /// Maximum concurrent connections across all endpoints.
    pub max_connections: usize,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            plaintext: Some("0.0.0.0:80".to_string()),
            tls: Some("0.0.0.0:443".to_string()),
            mutual_tls: Some("0.0.0.0:8443".to_string()),
            publish: Some("127.0.0.1:80".to_string()),
            max_connections: 10_000,
        }
    }
}

impl EndpointsConfig {
    /// Configured address for an endpoint kind.
    pub fn address(&self, kind: EndpointKind) -> Option<&str> {
        match kind {
            EndpointKind::Plaintext => self.plaintext.as_deref(),
            EndpointKind::Tls => self.tls.as_deref(),
            EndpointKind::MutualTls => self.mutual_tls.as_deref(),
            EndpointKind::LoopbackPublish => self.publish.as_deref(),
        }
    }
}

/// Connection budget configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Concurrent connections allowed from one source address.
    pub max_connections_per_address: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections_per_address: 10,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed for a request head to arrive.
    pub header_read_secs: u64,

    /// Time allowed between request body frames.
    pub body_read_secs: u64,

    /// Time allowed for a TLS handshake.
    pub handshake_secs: u64,

    /// Upstream connection establishment timeout.
    pub upstream_connect_secs: u64,

    /// Time allowed for an upstream to return its response head.
    pub upstream_response_secs: u64,

    /// How long shutdown waits for connections to drain.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            header_read_secs: 5,
            body_read_secs: 5,
            handshake_secs: 5,
            upstream_connect_secs: 600,
            upstream_response_secs: 600,
            shutdown_grace_secs: 10,
        }
    }
}

/// TLS configuration for the TLS endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,

    /// Trust root for client certificates (PEM).
    pub client_ca_path: String,

    /// Optional CRL applied to client certificates (PEM).
    pub client_crl_path: Option<String>,

    /// Fail the handshake when a presented client certificate does not verify.
    pub reject_invalid_client_certs: bool,

    /// ACME client live directory, used with managed certificates.
    pub acme_live_dir: String,

    /// Strict-Transport-Security max-age on the public TLS endpoint.
    pub hsts_max_age_secs: u64,

    /// DER-encoded OCSP response stapled on the mutual-TLS endpoint.
    pub ocsp_staple_path: Option<String>,

    /// How often the staple file is re-read.
    pub ocsp_refresh_secs: u64,

    /// Staples older than this are omitted.
    pub ocsp_max_age_secs: u64,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: "/etc/ca-gateway/tls/server.pem".to_string(),
            key_path: "/etc/ca-gateway/tls/server.key".to_string(),
            client_ca_path: "/etc/ca-gateway/tls/ca.pem".to_string(),
            client_crl_path: None,
            reject_invalid_client_certs: false,
            acme_live_dir: "/etc/letsencrypt/live".to_string(),
            hsts_max_age_secs: 15_768_000,
            ocsp_staple_path: None,
            ocsp_refresh_secs: 3600,
            ocsp_max_age_secs: 4 * 24 * 3600,
        }
    }
}

/// Where a matched route sends the request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouteTarget {
    /// Forward to a named upstream.
    Proxy { upstream: String },
    /// Serve files below a directory.
    Static { root: String },
    /// Redirect to the HTTPS origin.
    Redirect,
}

/// Route configuration mapping a path prefix to a target.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Literal path prefix to match.
    pub path_prefix: String,

    /// Target for matching requests.
    pub target: RouteTarget,

    /// Endpoints on which the route is reachable.
    #[serde(default = "public_endpoints")]
    pub endpoints: Vec<EndpointKind>,
}

/// Exact-path rewrite applied before routing; the query string is kept.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewriteConfig {
    pub from: String,
    pub to: String,
}

/// Channel broker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Idle time after which a long-poll request completes empty.
    pub long_poll_timeout_secs: u64,

    /// Messages queued per event-stream subscriber before it counts as slow.
    pub stream_queue_depth: usize,

    /// Interval of keep-alive comments on event streams.
    pub stream_keepalive_secs: u64,

    /// Largest accepted publish body in bytes.
    pub max_message_size: usize,

    /// Upstream receiving subscribe traffic when the push server is external.
    pub external_upstream: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            long_poll_timeout_secs: 55,
            stream_queue_depth: 64,
            stream_keepalive_secs: 15,
            max_message_size: 64 * 1024,
            external_upstream: "push".to_string(),
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Emit security response headers (HSTS on the public TLS endpoint).
    pub enable_headers: bool,
    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_headers: true,
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

fn public_endpoints() -> Vec<EndpointKind> {
    vec![EndpointKind::Plaintext, EndpointKind::Tls, EndpointKind::MutualTls]
}

fn tls_endpoints() -> Vec<EndpointKind> {
    vec![EndpointKind::Tls, EndpointKind::MutualTls]
}

fn default_upstreams() -> BTreeMap<String, String> {
    [
        ("ca_api", "127.0.0.1:8080"),
        ("ocsp", "127.0.0.1:5001"),
        ("crl", "127.0.0.1:5002"),
        ("scep", "127.0.0.1:5003"),
        ("builder", "127.0.0.1:5004"),
        ("log", "127.0.0.1:5005"),
    ]
    .into_iter()
    .map(|(name, addr)| (name.to_string(), addr.to_string()))
    .collect()
}

fn proxy_route(name: &str, prefix: &str, upstream: &str, endpoints: Vec<EndpointKind>) -> RouteConfig {
    RouteConfig {
        name: name.to_string(),
        path_prefix: prefix.to_string(),
        target: RouteTarget::Proxy {
            upstream: upstream.to_string(),
        },
        endpoints,
    }
}

fn static_route(name: &str, prefix: &str, root: &str, endpoints: Vec<EndpointKind>) -> RouteConfig {
    RouteConfig {
        name: name.to_string(),
        path_prefix: prefix.to_string(),
        target: RouteTarget::Static {
            root: root.to_string(),
        },
        endpoints,
    }
}

/// The stock prefix table of a CA front-end.
pub fn default_routes() -> Vec<RouteConfig> {
    vec![
        proxy_route("crl", "/api/revoked/", "crl", public_endpoints()),
        proxy_route("ocsp", "/api/ocsp/", "ocsp", public_endpoints()),
        proxy_route("scep", "/api/scep/", "scep", public_endpoints()),
        proxy_route("builder", "/api/builder/", "builder", tls_endpoints()),
        proxy_route("log", "/api/log/", "log", tls_endpoints()),
        proxy_route("api", "/api/", "ca_api", public_endpoints()),
        static_route("assets", "/assets/", "/var/lib/ca-gateway", public_endpoints()),
        static_route("acme", "/.well-known/", "/var/www/acme", vec![EndpointKind::Tls]),
        static_route("web", "/", "/usr/share/ca-gateway/web", tls_endpoints()),
        RouteConfig {
            name: "bootstrap".to_string(),
            path_prefix: "/".to_string(),
            target: RouteTarget::Redirect,
            endpoints: vec![EndpointKind::Plaintext],
        },
    ]
}

fn default_rewrites() -> Vec<RewriteConfig> {
    vec![RewriteConfig {
        from: "/cgi-bin/pkiclient.exe".to_string(),
        to: "/api/scep/".to_string(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_uses_defaults() {
        let config: GatewayConfig = toml::from_str("canonical_host = \"ca.example.com\"").unwrap();
        assert_eq!(config.canonical_host, "ca.example.com");
        assert_eq!(config.limits.max_connections_per_address, 10);
        assert_eq!(config.timeouts.upstream_response_secs, 600);
        assert_eq!(config.rewrites[0].to, "/api/scep/");
        assert!(config.routes.iter().any(|r| r.path_prefix == "/api/revoked/"));
    }

    #[test]
    fn route_targets_parse_from_toml() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [upstreams]
            ca_api = "10.0.0.5:8080"

            [[routes]]
            name = "api"
            path_prefix = "/api/"
            target = { kind = "proxy", upstream = "ca_api" }

            [[routes]]
            name = "web"
            path_prefix = "/"
            target = { kind = "static", root = "/srv/web" }
            endpoints = ["tls"]
            "#,
        )
        .unwrap();

        assert_eq!(config.routes.len(), 2);
        assert_eq!(
            config.routes[0].target,
            RouteTarget::Proxy { upstream: "ca_api".into() }
        );
        assert_eq!(config.routes[0].endpoints.len(), 3);
        assert_eq!(config.routes[1].endpoints, vec![EndpointKind::Tls]);
        assert_eq!(config.upstreams.len(), 1);
    }

    #[test]
    fn managed_certificates_switch_paths() {
        let mut config = GatewayConfig {
            canonical_host: "ca.example.com".into(),
            ..GatewayConfig::default()
        };
        assert_eq!(config.server_cert_path(), config.tls.cert_path);

        config.use_managed_certificates = true;
        assert_eq!(
            config.server_cert_path(),
            "/etc/letsencrypt/live/ca.example.com/fullchain.pem"
        );
        assert_eq!(
            config.server_key_path(),
            "/etc/letsencrypt/live/ca.example.com/privkey.pem"
        );
    }

    #[test]
    fn external_push_server_disables_publish() {
        let mut config = GatewayConfig::default();
        assert!(config.publish_enabled());
        config.push_server_external = true;
        assert!(!config.publish_enabled());
    }
}
