//! Endpoint accept loops.
//!
//! # Responsibilities
//! - Bind one TCP listener per enabled endpoint
//! - Admit sockets through the per-address limiter and the global cap
//! - Run the TLS handshake under a deadline on TLS endpoints
//! - Serve HTTP/1.1 and HTTP/2 on the connection until it closes or shutdown
//!
//! # Design Decisions
//! - Admission uses `try_acquire`: over-limit sockets are dropped at once
//! - Budget and permit live in the connection task, so every exit path frees them
//! - The endpoint's `ConnectionContext` is attached to each request here
//! - A connection that sends no request head within `header_read_timeout`
//!   is dropped, whatever protocol it speaks

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tower::ServiceExt;

use crate::error::{GatewayError, RejectReason};
use crate::lifecycle::Shutdown;
use crate::net::connection::{ConnectionContext, ConnectionTracker};
use crate::net::tls::TlsMaterials;
use crate::net::EndpointKind;
use crate::observability::metrics;
use crate::security::ConnectionLimiter;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid address '{0}' for the {1} endpoint")]
    Address(String, EndpointKind),

    #[error("failed to bind {endpoint} endpoint on {address}: {source}")]
    Bind {
        endpoint: EndpointKind,
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// State shared by every accept loop.
#[derive(Clone)]
pub struct AcceptContext {
    pub limiter: ConnectionLimiter,
    /// Process-wide connection cap across endpoints.
    pub permits: Arc<Semaphore>,
    pub tls: TlsMaterials,
    pub tracker: ConnectionTracker,
    pub shutdown: Shutdown,
    pub handshake_timeout: Duration,
    pub header_read_timeout: Duration,
}

/// A bound listener for one endpoint.
#[derive(Debug)]
pub struct EndpointListener {
    kind: EndpointKind,
    inner: TcpListener,
}

impl EndpointListener {
    pub async fn bind(kind: EndpointKind, address: &str) -> Result<Self, ListenerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|_| ListenerError::Address(address.to_string(), kind))?;

        let inner = TcpListener::bind(addr).await.map_err(|source| ListenerError::Bind {
            endpoint: kind,
            address: address.to_string(),
            source,
        })?;

        tracing::info!(
            endpoint = %kind,
            address = %inner.local_addr().unwrap_or(addr),
            "Listener bound"
        );
        Ok(Self { kind, inner })
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Accept until shutdown, serving each admitted connection with `app`.
    pub async fn run(self, app: Router, ctx: AcceptContext) {
        let stop = ctx.shutdown.wait();
        tokio::pin!(stop);
        loop {
            let (stream, peer) = tokio::select! {
                accepted = self.inner.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        // Usually fd exhaustion; back off instead of spinning.
                        tracing::warn!(endpoint = %self.kind, error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                },
                _ = &mut stop => break,
            };

            let budget = match ctx.limiter.admit(peer.ip()) {
                Ok(budget) => budget,
                Err(reason) => {
                    reject(self.kind, peer, reason);
                    continue;
                }
            };
            let permit = match Arc::clone(&ctx.permits).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    reject(self.kind, peer, RejectReason::GatewayAtCapacity);
                    continue;
                }
            };

            let app = app.clone();
            let ctx = ctx.clone();
            let kind = self.kind;
            tokio::spawn(async move {
                let _budget = budget;
                let _permit = permit;
                if let Err(e) = serve_connection(kind, stream, peer, app, &ctx).await {
                    tracing::debug!(endpoint = %kind, peer = %peer, error = %e, "Connection ended before routing");
                }
            });
        }
        tracing::info!(endpoint = %self.kind, "Listener stopped accepting");
    }
}

fn reject(kind: EndpointKind, peer: SocketAddr, reason: RejectReason) {
    let err = GatewayError::ConnectionRejected {
        addr: peer.ip(),
        reason,
    };
    tracing::debug!(endpoint = %kind, error = %err, "Connection refused");
    metrics::record_connection_rejected(reason.as_str());
}

async fn serve_connection(
    kind: EndpointKind,
    stream: TcpStream,
    peer: SocketAddr,
    app: Router,
    ctx: &AcceptContext,
) -> Result<(), GatewayError> {
    let _ = stream.set_nodelay(true);
    let conn = ConnectionContext::new(kind, peer);
    let _guard = ctx.tracker.track(conn.id);

    let Some(acceptor) = ctx.tls.acceptor(kind) else {
        serve_http(stream, conn, app, ctx).await;
        return Ok(());
    };

    let tls = match tokio::time::timeout(ctx.handshake_timeout, acceptor.accept(stream)).await {
        Ok(Ok(tls)) => tls,
        Ok(Err(e)) => return Err(handshake_failed(kind, e.to_string())),
        Err(_) => return Err(handshake_failed(kind, "timed out".to_string())),
    };

    let report = match kind {
        EndpointKind::MutualTls => ctx.tls.client_report(tls.get_ref().1.peer_certificates()),
        _ => None,
    };
    if let Some(report) = &report {
        tracing::debug!(
            connection_id = %conn.id,
            verify = %report.verification.header_value(),
            subject = report.subject.as_deref().unwrap_or("-"),
            "Client certificate presented"
        );
    }

    serve_http(tls, conn.with_client_cert(report), app, ctx).await;
    Ok(())
}

fn handshake_failed(kind: EndpointKind, reason: String) -> GatewayError {
    metrics::record_handshake_failure(kind.as_str());
    GatewayError::HandshakeFailed {
        endpoint: kind,
        reason,
    }
}

async fn serve_http<I>(io: I, conn: ConnectionContext, app: Router, ctx: &AcceptContext)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let id = conn.id;
    let started = Arc::new(AtomicBool::new(false));
    let service = {
        let started = Arc::clone(&started);
        hyper::service::service_fn(move |mut request: Request<Incoming>| {
            started.store(true, Ordering::Release);
            request.extensions_mut().insert(conn.clone());
            app.clone().oneshot(request)
        })
    };

    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(ctx.header_read_timeout);
    builder
        .http2()
        .timer(TokioTimer::new())
        .keep_alive_interval(Some(ctx.header_read_timeout))
        .keep_alive_timeout(ctx.header_read_timeout);

    let connection = builder.serve_connection_with_upgrades(TokioIo::new(io), service);
    tokio::pin!(connection);

    // Protocol detection and the h2 preface are not covered by hyper's
    // header timeout, so the first request head gets its own deadline.
    let first_request = tokio::time::sleep(ctx.header_read_timeout);
    tokio::pin!(first_request);
    let mut awaiting_first = true;

    let stop = ctx.shutdown.wait();
    tokio::pin!(stop);

    let result = loop {
        tokio::select! {
            result = connection.as_mut() => break result,
            _ = &mut first_request, if awaiting_first => {
                if started.load(Ordering::Acquire) {
                    awaiting_first = false;
                    continue;
                }
                tracing::debug!(connection_id = %id, "No request head before timeout, closing");
                metrics::record_connection_rejected(RejectReason::HeaderTimeout.as_str());
                return;
            }
            _ = &mut stop => {
                connection.as_mut().graceful_shutdown();
                break connection.as_mut().await;
            }
        }
    };
    if let Err(e) = result {
        tracing::debug!(connection_id = %id, error = %e, "Connection closed with error");
    }
}
