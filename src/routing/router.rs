//! Trust-domain router.
//!
//! # Responsibilities
//! - Apply legacy path rewrites
//! - Send channel paths to the broker, enforcing the loopback-only publish rule
//! - Pick the longest literal prefix among the routes enabled on an endpoint
//! - Return an explicit `RouteNotFound` rather than a silent default
//!
//! # Design Decisions
//! - Compiled once at startup, immutable afterwards (shared without locks)
//! - Per-endpoint tables, pre-sorted by prefix length
//! - Only the endpoint a connection arrived on decides trust; headers never do

use std::collections::HashMap;

use crate::broker::DeliveryMode;
use crate::config::{GatewayConfig, RouteTarget};
use crate::error::GatewayError;
use crate::net::EndpointKind;
use crate::routing::matcher::{ChannelAction, ChannelMatcher, PathPrefixMatcher};

/// Route name used for subscribe traffic sent to an external push server.
pub const PUSH_ROUTE: &str = "push";

/// Where a request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Subscribe {
        channel: String,
        mode: DeliveryMode,
    },
    Publish {
        channel: String,
    },
    Proxy {
        route: String,
        upstream: String,
        path_and_query: String,
    },
    Static {
        route: String,
        root: String,
        path: String,
    },
    Redirect {
        route: String,
        path_and_query: String,
    },
}

impl RouteDecision {
    /// Label for logs and metrics.
    pub fn route_name(&self) -> &str {
        match self {
            RouteDecision::Subscribe { .. } => "subscribe",
            RouteDecision::Publish { .. } => "publish",
            RouteDecision::Proxy { route, .. }
            | RouteDecision::Static { route, .. }
            | RouteDecision::Redirect { route, .. } => route,
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRoute {
    name: String,
    matcher: PathPrefixMatcher,
    target: RouteTarget,
}

#[derive(Debug, Clone)]
struct Rewrite {
    from: String,
    to: String,
}

/// Immutable routing tables for every endpoint.
#[derive(Debug, Clone)]
pub struct GatewayRouter {
    tables: HashMap<EndpointKind, Vec<CompiledRoute>>,
    rewrites: Vec<Rewrite>,
    channels: ChannelMatcher,
    external_push: Option<String>,
}

impl GatewayRouter {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, regex::Error> {
        let mut tables: HashMap<EndpointKind, Vec<CompiledRoute>> = HashMap::new();
        for route in &config.routes {
            for endpoint in &route.endpoints {
                tables.entry(*endpoint).or_default().push(CompiledRoute {
                    name: route.name.clone(),
                    matcher: PathPrefixMatcher::new(route.path_prefix.clone()),
                    target: route.target.clone(),
                });
            }
        }
        // Stable sort: equal prefixes keep configuration order.
        for table in tables.values_mut() {
            table.sort_by(|a, b| b.matcher.len().cmp(&a.matcher.len()));
        }

        let rewrites = config
            .rewrites
            .iter()
            .map(|r| Rewrite {
                from: r.from.clone(),
                to: r.to.clone(),
            })
            .collect();

        let router = Self {
            tables,
            rewrites,
            channels: ChannelMatcher::new()?,
            external_push: config
                .push_server_external
                .then(|| config.broker.external_upstream.clone()),
        };

        tracing::info!(
            routes = config.routes.len(),
            rewrites = router.rewrites.len(),
            external_push = router.external_push.is_some(),
            "Router compiled"
        );
        Ok(router)
    }

    /// Decide where a request arriving on `endpoint` goes.
    pub fn route(
        &self,
        endpoint: EndpointKind,
        path: &str,
        query: Option<&str>,
    ) -> Result<RouteDecision, GatewayError> {
        let path = self.rewrite(path);
        let path_and_query = match query {
            Some(q) => format!("{path}?{q}"),
            None => path.to_string(),
        };

        if let Some(matched) = self.channels.matches(path) {
            return match matched.action {
                ChannelAction::Publish(_) if endpoint != EndpointKind::LoopbackPublish => {
                    Err(GatewayError::PublishRejected {
                        channel: matched.channel,
                        endpoint,
                    })
                }
                ChannelAction::Publish(_) => Ok(RouteDecision::Publish {
                    channel: matched.channel,
                }),
                ChannelAction::Subscribe(_) if endpoint == EndpointKind::LoopbackPublish => {
                    Err(self.not_found(endpoint, path))
                }
                ChannelAction::Subscribe(mode) => match &self.external_push {
                    Some(upstream) => Ok(RouteDecision::Proxy {
                        route: PUSH_ROUTE.to_string(),
                        upstream: upstream.clone(),
                        path_and_query,
                    }),
                    None => Ok(RouteDecision::Subscribe {
                        channel: matched.channel,
                        mode,
                    }),
                },
            };
        }

        let route = self
            .tables
            .get(&endpoint)
            .and_then(|table| table.iter().find(|r| r.matcher.matches(path)))
            .ok_or_else(|| self.not_found(endpoint, path))?;

        Ok(match &route.target {
            RouteTarget::Proxy { upstream } => RouteDecision::Proxy {
                route: route.name.clone(),
                upstream: upstream.clone(),
                path_and_query,
            },
            RouteTarget::Static { root } => RouteDecision::Static {
                route: route.name.clone(),
                root: root.clone(),
                path: path.to_string(),
            },
            RouteTarget::Redirect => RouteDecision::Redirect {
                route: route.name.clone(),
                path_and_query,
            },
        })
    }

    fn rewrite<'a>(&'a self, path: &'a str) -> &'a str {
        self.rewrites
            .iter()
            .find(|r| r.from == path)
            .map(|r| r.to.as_str())
            .unwrap_or(path)
    }

    fn not_found(&self, endpoint: EndpointKind, path: &str) -> GatewayError {
        GatewayError::RouteNotFound {
            endpoint,
            path: path.to_string(),
        }
    }
}
