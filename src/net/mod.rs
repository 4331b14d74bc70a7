//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection on one of four endpoints
//!     → listener.rs (per-address budget, global connection cap)
//!     → tls.rs (handshake for TLS endpoints, client certificate report)
//!     → connection.rs (context for requests, lifecycle tracking)
//!     → hand off to the endpoint's HTTP app
//!
//! Connection states:
//!     Accepting → Handshaking → Active → Draining → Closed
//! ```
//!
//! # Design Decisions
//! - Admission is non-blocking: over-limit sockets are closed, not queued
//! - Each connection is tracked for graceful shutdown
//! - Handshake failures never reach the router

pub mod connection;
pub mod endpoint;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionContext, ConnectionId, ConnectionTracker};
pub use endpoint::{EndpointKind, Transport};
pub use listener::EndpointListener;
pub use tls::TlsMaterials;
