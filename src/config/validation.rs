//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing upstreams)
//! - Validate value ranges (timeouts > 0, ceilings > 0)
//! - Keep the publish endpoint on loopback
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{GatewayConfig, RouteTarget};
use crate::net::EndpointKind;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("endpoint {endpoint} has invalid address '{address}'")]
    InvalidAddress { endpoint: EndpointKind, address: String },

    #[error("publish endpoint must bind a loopback address, got '{0}'")]
    PublishNotLoopback(String),

    #[error("route '{route}' references unknown upstream '{upstream}'")]
    UnknownUpstream { route: String, upstream: String },

    #[error("upstream '{name}' has invalid address '{address}'")]
    InvalidUpstream { name: String, address: String },

    #[error("route '{0}' prefix must start with '/'")]
    RelativePrefix(String),

    #[error("route '{0}' cannot be served on the publish endpoint")]
    RouteOnPublishEndpoint(String),

    #[error("route '{0}' is not reachable on any endpoint")]
    RouteWithoutEndpoint(String),

    #[error("duplicate route name '{0}'")]
    DuplicateRoute(String),

    #[error("prefix '{prefix}' is routed twice on endpoint {endpoint}")]
    DuplicatePrefix { prefix: String, endpoint: EndpointKind },

    #[error("rewrite '{0}' must map absolute paths")]
    RelativeRewrite(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("push_server_external requires upstream '{0}'")]
    MissingPushUpstream(String),

    #[error("canonical_host must not be empty")]
    EmptyHost,
}

/// Check a parsed configuration, collecting every violation.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.canonical_host.trim().is_empty() {
        errors.push(ValidationError::EmptyHost);
    }

    validate_endpoints(config, &mut errors);
    validate_upstreams(config, &mut errors);
    validate_routes(config, &mut errors);

    for rewrite in &config.rewrites {
        if !rewrite.from.starts_with('/') || !rewrite.to.starts_with('/') {
            errors.push(ValidationError::RelativeRewrite(rewrite.from.clone()));
        }
    }

    let positive = [
        ("endpoints.max_connections", config.endpoints.max_connections as u64),
        ("limits.max_connections_per_address", config.limits.max_connections_per_address as u64),
        ("timeouts.header_read_secs", config.timeouts.header_read_secs),
        ("timeouts.body_read_secs", config.timeouts.body_read_secs),
        ("timeouts.handshake_secs", config.timeouts.handshake_secs),
        ("timeouts.upstream_connect_secs", config.timeouts.upstream_connect_secs),
        ("timeouts.upstream_response_secs", config.timeouts.upstream_response_secs),
        ("broker.long_poll_timeout_secs", config.broker.long_poll_timeout_secs),
        ("broker.stream_queue_depth", config.broker.stream_queue_depth as u64),
        ("broker.stream_keepalive_secs", config.broker.stream_keepalive_secs),
        ("broker.max_message_size", config.broker.max_message_size as u64),
        ("tls.ocsp_refresh_secs", config.tls.ocsp_refresh_secs),
    ];
    for (name, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero(name));
        }
    }

    if config.push_server_external && !config.upstreams.contains_key(&config.broker.external_upstream) {
        errors.push(ValidationError::MissingPushUpstream(
            config.broker.external_upstream.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_endpoints(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    for kind in EndpointKind::ALL {
        let Some(address) = config.endpoints.address(kind) else {
            continue;
        };
        match address.parse::<SocketAddr>() {
            Ok(addr) => {
                if kind == EndpointKind::LoopbackPublish && !addr.ip().is_loopback() {
                    errors.push(ValidationError::PublishNotLoopback(address.to_string()));
                }
            }
            Err(_) => errors.push(ValidationError::InvalidAddress {
                endpoint: kind,
                address: address.to_string(),
            }),
        }
    }
}

fn validate_upstreams(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    for (name, address) in &config.upstreams {
        if address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidUpstream {
                name: name.clone(),
                address: address.clone(),
            });
        }
    }
}

fn validate_routes(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    let mut names = HashSet::new();
    let mut prefixes = HashSet::new();

    for route in &config.routes {
        if !names.insert(route.name.as_str()) {
            errors.push(ValidationError::DuplicateRoute(route.name.clone()));
        }
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::RelativePrefix(route.name.clone()));
        }
        if route.endpoints.is_empty() {
            errors.push(ValidationError::RouteWithoutEndpoint(route.name.clone()));
        }
        if route.endpoints.contains(&EndpointKind::LoopbackPublish) {
            errors.push(ValidationError::RouteOnPublishEndpoint(route.name.clone()));
        }
        for endpoint in &route.endpoints {
            if !prefixes.insert((route.path_prefix.as_str(), *endpoint)) {
                errors.push(ValidationError::DuplicatePrefix {
                    prefix: route.path_prefix.clone(),
                    endpoint: *endpoint,
                });
            }
        }
        if let RouteTarget::Proxy { upstream } = &route.target {
            if !config.upstreams.contains_key(upstream) {
                errors.push(ValidationError::UnknownUpstream {
                    route: route.name.clone(),
                    upstream: upstream.clone(),
                });
            }
        }
    }
}
