//! CA service network gateway.
//!
//! Terminates the public and mutual-TLS endpoints of a certificate authority,
//! routes requests to the CA's backend services by trust domain, and hosts a
//! pub/sub channel broker for status notifications.

pub mod broker;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod routing;
pub mod security;

pub use broker::Broker;
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
