//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! connection (net/listener.rs attaches ConnectionContext)
//!     → server.rs (request id, tracing, body limits, HSTS)
//!     → routing decision
//!     → proxy client | channels.rs | static files | redirect
//!     → response.rs (hop-by-hop stripping, failure document)
//! ```

pub mod channels;
pub mod request;
pub mod response;
pub mod server;

pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use server::{GatewayServer, ServerError};
