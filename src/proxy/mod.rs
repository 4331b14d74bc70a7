//! Backend proxy subsystem.
//!
//! # Data Flow
//! ```text
//! RouteDecision::Proxy { upstream, path_and_query }
//!     → upstream.rs (name → address, in-flight guard)
//!     → security/headers.rs (Host, X-Real-IP, X-Forwarded-*, X-SSL-*)
//!     → client.rs (pooled request, connect + response-head deadlines)
//!     → streamed response, or the failure document
//! ```
//!
//! # Design Decisions
//! - No transparent retries; retry policy belongs to the calling client
//! - Deadlines are generous because upstreams may stream

pub mod client;
pub mod upstream;

pub use client::ProxyClient;
pub use upstream::{Upstream, UpstreamRegistry};
