//! Gateway error taxonomy.
//!
//! Connection-level failures (`ConnectionRejected`, `HandshakeFailed`) end a
//! connection before any request exists and are only logged and counted.
//! Everything else is rendered to the client through [`IntoResponse`].

use std::net::IpAddr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::http::response::failure_response;
use crate::net::EndpointKind;

/// Why a connection was refused admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The source address is at its connection ceiling.
    TooManyConnections,
    /// The process-wide connection pool is exhausted.
    GatewayAtCapacity,
    /// No request head arrived before the header read timeout.
    HeaderTimeout,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::TooManyConnections => "too_many_connections",
            RejectReason::GatewayAtCapacity => "gateway_at_capacity",
            RejectReason::HeaderTimeout => "header_timeout",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("connection from {addr} rejected: {reason}")]
    ConnectionRejected { addr: IpAddr, reason: RejectReason },

    #[error("TLS handshake on {endpoint} failed: {reason}")]
    HandshakeFailed { endpoint: EndpointKind, reason: String },

    #[error("no route for '{path}' on {endpoint}")]
    RouteNotFound { endpoint: EndpointKind, path: String },

    #[error("upstream '{upstream}' unavailable: {reason}")]
    UpstreamUnavailable { upstream: String, reason: String },

    #[error("upstream '{upstream}' did not answer within {secs}s")]
    UpstreamTimeout { upstream: String, secs: u64 },

    #[error("no message on channel '{channel}' before the poll expired")]
    SubscriptionTimedOut { channel: String },

    #[error("publish to '{channel}' refused on {endpoint}")]
    PublishRejected { channel: String, endpoint: EndpointKind },

    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Status the client sees for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::PublishRejected { .. } => StatusCode::FORBIDDEN,
            GatewayError::SubscriptionTimedOut { .. } => StatusCode::NO_CONTENT,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => crate::http::response::FAILURE_STATUS,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match &self {
            GatewayError::SubscriptionTimedOut { channel } => {
                tracing::debug!(channel = %channel, "Long poll expired");
                StatusCode::NO_CONTENT.into_response()
            }
            GatewayError::PublishRejected { channel, endpoint } => {
                tracing::warn!(channel = %channel, endpoint = %endpoint, "Publish refused off the loopback endpoint");
                (StatusCode::FORBIDDEN, "publish is only accepted on the loopback endpoint\n").into_response()
            }
            GatewayError::PayloadTooLarge { size, limit } => {
                tracing::debug!(size, limit, "Publish body too large");
                StatusCode::PAYLOAD_TOO_LARGE.into_response()
            }
            GatewayError::RouteNotFound { endpoint, path } => {
                tracing::debug!(endpoint = %endpoint, path = %path, "No route matched");
                failure_response()
            }
            other => {
                tracing::warn!(error = %other, "Serving failure document");
                failure_response()
            }
        }
    }
}
