//! Connection identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Carry per-connection facts (endpoint, peer, client certificate) into requests
//! - Count live connections so shutdown can wait for them to drain

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::net::EndpointKind;
use crate::security::client_cert::ClientCertificate;

/// Relaxed ordering is enough: IDs only need to be unique.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What the gateway knows about the connection a request arrived on.
///
/// Inserted into every request's extensions by the accept loop. Routing and
/// header forwarding read the peer and certificate from here, never from
/// client-supplied headers.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub id: ConnectionId,
    pub endpoint: EndpointKind,
    pub peer: SocketAddr,
    pub client_cert: Option<Arc<ClientCertificate>>,
}

impl ConnectionContext {
    pub fn new(endpoint: EndpointKind, peer: SocketAddr) -> Self {
        Self {
            id: ConnectionId::new(),
            endpoint,
            peer,
            client_cert: None,
        }
    }

    pub fn with_client_cert(mut self, cert: Option<ClientCertificate>) -> Self {
        self.client_cert = cert.map(Arc::new);
        self
    }
}

/// Tracks live connections for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    active: AtomicU64,
    drained: Notify,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new live connection. The returned guard decrements on drop.
    pub fn track(&self, id: ConnectionId) -> ConnectionGuard {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    pub fn active_count(&self) -> u64 {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Wait until every tracked connection has closed, or `grace` elapses.
    ///
    /// Returns the number of connections still open.
    pub async fn drain(&self, grace: Duration) -> u64 {
        let wait = async {
            loop {
                let notified = self.inner.drained.notified();
                if self.active_count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        let _ = tokio::time::timeout(grace, wait).await;
        self.active_count()
    }
}

/// Guard that tracks a connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    inner: Arc<TrackerInner>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.drained.notify_waiters();
        }
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn-"));
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track(ConnectionId::new());
        let guard2 = tracker.track(ConnectionId::new());
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn drain_returns_when_last_connection_closes() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track(ConnectionId::new());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        assert_eq!(tracker.drain(Duration::from_secs(5)).await, 0);
    }

    #[tokio::test]
    async fn drain_gives_up_after_grace() {
        let tracker = ConnectionTracker::new();
        let _guard = tracker.track(ConnectionId::new());
        assert_eq!(tracker.drain(Duration::from_millis(20)).await, 1);
    }
}
