//! Response helpers.
//!
//! # Responsibilities
//! - The fixed failure document served for unroutable requests and upstream failures
//! - Hop-by-hop header stripping on the way back to the client
//!
//! # Design Decisions
//! - The failure body never names the route or upstream that failed
//! - Response bodies stream through unbuffered

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

/// Status of the failure document. Distinct from the 500/503/504 an upstream
/// might produce itself.
pub const FAILURE_STATUS: StatusCode = StatusCode::BAD_GATEWAY;

/// Body of the failure document.
pub const FAILURE_DOCUMENT: &str =
    "{\"error\":\"upstream_unavailable\",\"message\":\"The requested service is temporarily unavailable.\"}\n";

/// Headers that describe a single transport hop and are never forwarded.
pub const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Render the failure document.
pub fn failure_response() -> Response {
    let mut response = (FAILURE_STATUS, Body::from(FAILURE_DOCUMENT)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    for name in named {
        headers.remove(name.as_str());
    }
}

/// Map an upstream response onto the client response, streaming the body.
pub fn from_upstream(response: hyper::Response<hyper::body::Incoming>) -> Response {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, Body::new(body))
}
