//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted socket:
//!     → limits.rs (per-address connection budget)
//!     → TLS handshake (net/tls.rs)
//!     → client_cert.rs (verification report for the presented chain)
//! Request to an upstream:
//!     → headers.rs (strip spoofable headers, add X-Forwarded-*, X-SSL-*)
//! Response on the public TLS endpoint:
//!     → headers.rs (Strict-Transport-Security)
//! ```
//!
//! # Design Decisions
//! - Trust comes from the listener and the handshake, never from headers
//! - Over-limit connections are refused outright

pub mod client_cert;
pub mod headers;
pub mod limits;

pub use limits::{ConnectionBudget, ConnectionLimiter};
