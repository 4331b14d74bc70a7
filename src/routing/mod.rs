//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (endpoint, path, query)
//!     → router.rs: exact-path rewrites
//!     → matcher.rs: channel path class (/lp|ev/sub|pub/<id>)
//!     → matcher.rs: literal prefixes enabled on the endpoint
//!     → RouteDecision or RouteNotFound / PublishRejected
//!
//! Route compilation (at startup):
//!     RouteConfig[]
//!     → split per endpoint
//!     → sort by prefix length (longest first)
//!     → freeze as immutable GatewayRouter
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - Deterministic: same endpoint and path always give the same decision
//! - Channel paths are checked before prefixes so `/` catch-alls cannot shadow them

pub mod matcher;
pub mod router;

pub use router::{GatewayRouter, RouteDecision};
