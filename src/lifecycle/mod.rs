//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (http/server.rs):
//!     Load config → Validate → TLS materials → Bind endpoints → Serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Close broker → Drain connections → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Shutdown has a deadline: connections left after the grace period are abandoned

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
