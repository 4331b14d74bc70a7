//! Upstream services.
//!
//! # Responsibilities
//! - Resolve an upstream name to its address
//! - Track in-flight requests per upstream

use std::collections::{BTreeMap, HashMap};
use std::net::{AddrParseError, SocketAddr};
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::uri::{InvalidUri, Uri};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream '{name}' has invalid address '{address}': {source}")]
    Address {
        name: String,
        address: String,
        #[source]
        source: AddrParseError,
    },
}

/// A named backend service.
#[derive(Debug)]
pub struct Upstream {
    pub name: String,
    pub addr: SocketAddr,
    in_flight: AtomicUsize,
}

impl Upstream {
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Requests currently being forwarded.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Count a request until the guard drops.
    pub fn begin(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            upstream: Arc::clone(self),
        }
    }

    /// Absolute URI for a path on this upstream.
    pub fn uri_for(&self, path_and_query: &str) -> Result<Uri, InvalidUri> {
        format!("http://{}{}", self.addr, path_and_query).parse()
    }
}

/// Keeps an upstream's in-flight count raised.
#[derive(Debug)]
pub struct InFlightGuard {
    upstream: Arc<Upstream>,
}

impl Deref for InFlightGuard {
    type Target = Upstream;
    fn deref(&self) -> &Self::Target {
        &self.upstream
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.upstream.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Every configured upstream by name.
#[derive(Debug, Clone, Default)]
pub struct UpstreamRegistry {
    upstreams: HashMap<String, Arc<Upstream>>,
}

impl UpstreamRegistry {
    pub fn from_config(upstreams: &BTreeMap<String, String>) -> Result<Self, UpstreamError> {
        let upstreams = upstreams
            .iter()
            .map(|(name, address)| {
                let addr = address.parse().map_err(|source| UpstreamError::Address {
                    name: name.clone(),
                    address: address.clone(),
                    source,
                })?;
                Ok((name.clone(), Arc::new(Upstream::new(name.clone(), addr))))
            })
            .collect::<Result<HashMap<_, _>, UpstreamError>>()?;
        Ok(Self { upstreams })
    }

    pub fn get(&self, name: &str) -> Option<Arc<Upstream>> {
        self.upstreams.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }
}
