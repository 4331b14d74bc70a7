//! Forwarded headers and security response headers.
//!
//! # Responsibilities
//! - Replace client-supplied identity headers with what the connection proved
//! - Attach the client certificate report for upstream authorization
//! - Emit Strict-Transport-Security on the public TLS endpoint
//!
//! # Design Decisions
//! - Client-supplied `X-Forwarded-*`, `X-Real-IP` and `X-SSL-*` are always
//!   discarded; the gateway is the first hop and trusts no earlier one
//! - The gateway verifies certificates but never authorizes on them

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::http::response::strip_hop_by_hop;
use crate::net::connection::ConnectionContext;
use crate::security::client_cert::verify_header;

pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_SSL_VERIFY: HeaderName = HeaderName::from_static("x-ssl-verify");
pub const X_SSL_CERT: HeaderName = HeaderName::from_static("x-ssl-cert");
pub const X_SSL_CLIENT_DN: HeaderName = HeaderName::from_static("x-ssl-client-dn");

const SPOOFABLE: [&str; 4] = ["x-forwarded-host", "forwarded", "x-forwarded-port", "x-client-ip"];

/// Rewrite request headers for an upstream.
pub fn apply_forwarded_headers(headers: &mut HeaderMap, ctx: &ConnectionContext, canonical_host: &str) {
    strip_hop_by_hop(headers);

    let ssl: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with("x-ssl-"))
        .cloned()
        .collect();
    for name in ssl {
        headers.remove(name);
    }
    for name in SPOOFABLE {
        headers.remove(name);
    }

    if let Ok(host) = HeaderValue::from_str(canonical_host) {
        headers.insert(header::HOST, host);
    }

    let peer = ctx.peer.ip().to_string();
    if let Ok(ip) = HeaderValue::from_str(&peer) {
        headers.insert(X_REAL_IP, ip.clone());
        headers.insert(X_FORWARDED_FOR, ip);
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(ctx.endpoint.scheme()));

    let cert = ctx.client_cert.as_deref();
    if let Ok(verify) = HeaderValue::from_str(&verify_header(cert)) {
        headers.insert(X_SSL_VERIFY, verify);
    }
    if let Some(cert) = cert {
        if let Ok(pem) = HeaderValue::from_str(&cert.escaped_pem()) {
            headers.insert(X_SSL_CERT, pem);
        }
        if let Some(dn) = cert.subject.as_deref().and_then(|s| HeaderValue::from_str(s).ok()) {
            headers.insert(X_SSL_CLIENT_DN, dn);
        }
    }
}

/// `Strict-Transport-Security` value for a max-age.
pub fn hsts_value(max_age_secs: u64) -> HeaderValue {
    HeaderValue::from_str(&format!("max-age={max_age_secs}"))
        .unwrap_or_else(|_| HeaderValue::from_static("max-age=0"))
}

/// Layer adding HSTS to responses that do not already carry it.
pub fn hsts_layer(max_age_secs: u64) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::if_not_present(header::STRICT_TRANSPORT_SECURITY, hsts_value(max_age_secs))
}
