//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (fmt layer, filtered by RUST_LOG / log_level)
//!     → Prometheus scrape of /metrics on the metrics address
//! ```
//!
//! # Design Decisions
//! - Request ID flows from the edge to upstreams and back
//! - Metrics are cheap and disabled unless an exporter is configured

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
