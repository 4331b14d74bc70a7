//! CA service network gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌───────────────────────────────────────────────────┐
//!                      │                    CA GATEWAY                     │
//!   :80   plaintext ───┼─┐                                                 │
//!   :443  tls       ───┼─┤  ┌──────────┐   ┌─────────┐   ┌──────────────┐  │
//!   :8443 mutual tls───┼─┼─▶│ limiter  │──▶│  tls +  │──▶│ trust-domain │  │
//!   lo:80 publish   ───┼─┘  │ + cap    │   │ context │   │    router    │  │
//!                      │    └──────────┘   └─────────┘   └──────┬───────┘  │
//!                      │                          ┌─────────────┼────────┐ │
//!                      │                          ▼             ▼        ▼ │
//!                      │                   ┌────────────┐ ┌────────┐ ┌────┐│
//!   CA API, OCSP, CRL ◀┼───────────────────│proxy client│ │ broker │ │ fs ││
//!   SCEP, builder, log │                   └────────────┘ └────────┘ └────┘│
//!                      └───────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use ca_gateway::config::load_config;
use ca_gateway::lifecycle::signals::shutdown_on_signal;
use ca_gateway::observability::{init_logging, metrics};
use ca_gateway::{GatewayServer, Shutdown};

#[derive(Parser)]
#[command(name = "ca-gateway")]
#[command(about = "Network gateway for a certificate authority", long_about = None)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, env = "CA_GATEWAY_CONFIG", default_value = "/etc/ca-gateway/gateway.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_logging(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        canonical_host = %config.canonical_host,
        push_server_external = config.push_server_external,
        "ca-gateway starting"
    );

    let shutdown = Shutdown::new();

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => {
                let handle = metrics::install_recorder()?;
                let stop = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = metrics::serve_metrics(handle, addr, async move { stop.wait().await }).await {
                        tracing::error!(error = %e, "Metrics endpoint failed");
                    }
                });
            }
            Err(_) => {
                tracing::error!(
                    address = %config.observability.metrics_address,
                    "Invalid metrics address, metrics disabled"
                );
            }
        }
    }

    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    let server = GatewayServer::bind(config, shutdown).await?;
    server.run().await?;
    Ok(())
}
