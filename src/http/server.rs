//! Gateway server setup.
//!
//! # Responsibilities
//! - Validate configuration and build every subsystem from it
//! - Bind one listener per enabled endpoint
//! - Wire up middleware (request id, tracing, body limits, HSTS)
//! - Dispatch each request on the router's decision
//! - Drain connections on shutdown

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{Extension, State},
    http::{header, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    timeout::RequestBodyTimeoutLayer,
    trace::TraceLayer,
};

use crate::broker::Broker;
use crate::config::{validate_config, GatewayConfig, ValidationError};
use crate::http::channels::ChannelService;
use crate::http::request::{request_id, MakeRequestUuid};
use crate::http::response::failure_response;
use crate::lifecycle::Shutdown;
use crate::net::listener::{AcceptContext, ListenerError};
use crate::net::tls::{spawn_staple_refresh, TlsError};
use crate::net::{ConnectionContext, ConnectionTracker, EndpointKind, EndpointListener, TlsMaterials};
use crate::observability::metrics;
use crate::proxy::upstream::UpstreamError;
use crate::proxy::{ProxyClient, UpstreamRegistry};
use crate::routing::{GatewayRouter, RouteDecision};
use crate::security::headers::hsts_layer;
use crate::security::ConnectionLimiter;

/// Error type for server startup.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {}", join(.0))]
    Invalid(Vec<ValidationError>),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("channel path pattern: {0}")]
    Router(#[from] regex::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Application state injected into the dispatcher.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub router: Arc<GatewayRouter>,
    pub proxy: ProxyClient,
    pub channels: ChannelService,
}

/// The gateway: every endpoint, bound and ready to serve.
pub struct GatewayServer {
    config: Arc<GatewayConfig>,
    state: AppState,
    listeners: Vec<EndpointListener>,
    addresses: HashMap<EndpointKind, SocketAddr>,
    accept: AcceptContext,
}

impl GatewayServer {
    /// Build all subsystems and bind the enabled endpoints.
    pub async fn bind(config: GatewayConfig, shutdown: Shutdown) -> Result<Self, ServerError> {
        validate_config(&config).map_err(ServerError::Invalid)?;
        let config = Arc::new(config);

        let tls = TlsMaterials::load(&config)?;
        let upstreams = UpstreamRegistry::from_config(&config.upstreams)?;
        let broker = Broker::new(&config.broker);
        let state = AppState {
            config: Arc::clone(&config),
            router: Arc::new(GatewayRouter::from_config(&config)?),
            proxy: ProxyClient::new(&config, upstreams),
            channels: ChannelService::new(broker, &config.broker, config.security.max_body_size),
        };

        let mut listeners = Vec::new();
        let mut addresses = HashMap::new();
        for kind in EndpointKind::ALL {
            let Some(address) = config.endpoints.address(kind) else {
                continue;
            };
            if kind == EndpointKind::LoopbackPublish && !config.publish_enabled() {
                tracing::info!("Publish endpoint disabled, push server is external");
                continue;
            }
            let listener = EndpointListener::bind(kind, address).await?;
            addresses.insert(kind, listener.local_addr()?);
            listeners.push(listener);
        }

        let accept = AcceptContext {
            limiter: ConnectionLimiter::new(config.limits.max_connections_per_address),
            permits: Arc::new(Semaphore::new(config.endpoints.max_connections)),
            tls,
            tracker: ConnectionTracker::new(),
            shutdown,
            handshake_timeout: Duration::from_secs(config.timeouts.handshake_secs),
            header_read_timeout: Duration::from_secs(config.timeouts.header_read_secs),
        };

        Ok(Self {
            config,
            state,
            listeners,
            addresses,
            accept,
        })
    }

    /// Bound address of an endpoint, if it is enabled.
    pub fn local_addr(&self, kind: EndpointKind) -> Option<SocketAddr> {
        self.addresses.get(&kind).copied()
    }

    pub fn broker(&self) -> &Broker {
        &self.state.channels.broker
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Serve every endpoint until shutdown, then drain.
    pub async fn run(self) -> Result<(), ServerError> {
        let Self {
            config,
            state,
            listeners,
            accept,
            ..
        } = self;

        let staple_task = match (accept.tls.stapler(), &config.tls.ocsp_staple_path) {
            (Some(stapler), Some(path)) => Some(spawn_staple_refresh(
                stapler,
                PathBuf::from(path),
                Duration::from_secs(config.tls.ocsp_refresh_secs),
                Duration::from_secs(config.tls.ocsp_max_age_secs),
                accept.shutdown.clone(),
            )),
            _ => None,
        };

        let mut tasks = JoinSet::new();
        for listener in listeners {
            let app = build_app(listener.kind(), &config, state.clone());
            tasks.spawn(listener.run(app, accept.clone()));
        }
        tracing::info!(endpoints = tasks.len(), "Gateway serving");

        accept.shutdown.wait().await;
        tracing::info!("Shutdown signal received, draining");

        let ended = state.channels.broker.shutdown();
        tracing::info!(subscriptions = ended, "Channel subscriptions ended");

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Listener task failed");
            }
        }
        if let Some(task) = staple_task {
            let _ = task.await;
        }

        let grace = Duration::from_secs(config.timeouts.shutdown_grace_secs);
        let remaining = accept.tracker.drain(grace).await;
        if remaining > 0 {
            tracing::warn!(remaining, "Connections still open after grace period");
        }
        tracing::info!("Gateway stopped");
        Ok(())
    }
}

/// Build the request pipeline for one endpoint.
pub fn build_app(kind: EndpointKind, config: &GatewayConfig, state: AppState) -> Router {
    let mut app = Router::new().fallback(dispatch).with_state(state);

    if kind == EndpointKind::Tls && config.security.enable_headers {
        app = app.layer(hsts_layer(config.tls.hsts_max_age_secs));
    }

    app.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(RequestBodyTimeoutLayer::new(Duration::from_secs(config.timeouts.body_read_secs)))
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size)),
    )
}

/// Route one request and hand it to the proxy, the broker or the file server.
async fn dispatch(
    State(state): State<AppState>,
    Extension(conn): Extension<ConnectionContext>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let id = request_id(&request).to_string();
    let uri = request.uri().clone();

    let decision = match state.router.route(conn.endpoint, uri.path(), uri.query()) {
        Ok(decision) => decision,
        Err(e) => {
            let response = e.into_response();
            metrics::record_request(conn.endpoint.as_str(), "none", response.status().as_u16(), start);
            return response;
        }
    };
    let route = decision.route_name().to_string();

    tracing::debug!(
        request_id = %id,
        connection_id = %conn.id,
        endpoint = %conn.endpoint,
        method = %request.method(),
        path = %uri.path(),
        route = %route,
        "Dispatching request"
    );

    let response = match decision {
        RouteDecision::Subscribe { channel, mode } => {
            state.channels.subscribe(channel, mode, request.method()).await
        }
        RouteDecision::Publish { channel } => state.channels.publish(channel, request).await,
        RouteDecision::Proxy {
            upstream,
            path_and_query,
            ..
        } => match state.proxy.forward(&upstream, &path_and_query, request, &conn).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        },
        RouteDecision::Static { root, path, .. } => serve_static(&root, &path, request).await,
        RouteDecision::Redirect { path_and_query, .. } => {
            redirect(&state.config.canonical_host, &path_and_query)
        }
    };

    metrics::record_request(conn.endpoint.as_str(), &route, response.status().as_u16(), start);
    response
}

/// Serve `path` below `root`. A missing file gets the failure document.
async fn serve_static(root: &str, path: &str, request: Request<Body>) -> Response {
    let (mut parts, body) = request.into_parts();
    parts.uri = match path.parse() {
        Ok(uri) => uri,
        Err(_) => return failure_response(),
    };

    let response = match ServeDir::new(root).oneshot(Request::from_parts(parts, body)).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    if response.status() == StatusCode::NOT_FOUND {
        tracing::debug!(root = %root, path = %path, "Static file not found");
        return failure_response();
    }
    response.map(Body::new)
}

fn redirect(canonical_host: &str, path_and_query: &str) -> Response {
    let location = format!("https://{canonical_host}{path_and_query}");
    match HeaderValue::from_str(&location) {
        Ok(location) => (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response(),
        Err(_) => failure_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_targets_canonical_host() {
        let response = redirect("ca.example.com", "/roots.pem?x=1");
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://ca.example.com/roots.pem?x=1"
        );
    }

    #[tokio::test]
    async fn static_files_are_served_and_missing_ones_fail() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("assets")).unwrap();
        std::fs::write(dir.path().join("assets/root.pem"), "PEM").unwrap();
        let root = dir.path().to_str().unwrap();

        let found = serve_static(root, "/assets/root.pem", Request::new(Body::empty())).await;
        assert_eq!(found.status(), StatusCode::OK);

        let missing = serve_static(root, "/assets/nope.pem", Request::new(Body::empty())).await;
        assert_eq!(missing.status(), crate::http::response::FAILURE_STATUS);
    }

    #[test]
    fn validation_errors_are_joined() {
        let err = ServerError::Invalid(vec![ValidationError::EmptyHost, ValidationError::Zero("limits")]);
        let text = err.to_string();
        assert!(text.contains("canonical_host"));
        assert!(text.contains("limits"));
    }
}
