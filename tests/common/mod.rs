//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use ca_gateway::net::EndpointKind;
use ca_gateway::{Broker, GatewayConfig, GatewayServer, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Start a backend that answers every request with `tag` on the first line
/// followed by the request head it received, lowercased.
pub async fn start_echo_backend(tag: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 4096];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let body = format!("{tag}\n{}", String::from_utf8_lossy(&head).to_ascii_lowercase());
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Plaintext and publish endpoints on ephemeral loopback ports, no TLS.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig {
        canonical_host: "ca.test".into(),
        ..GatewayConfig::default()
    };
    config.endpoints.plaintext = Some("127.0.0.1:0".into());
    config.endpoints.tls = None;
    config.endpoints.mutual_tls = None;
    config.endpoints.publish = Some("127.0.0.1:0".into());
    config.broker.long_poll_timeout_secs = 1;
    config.timeouts.shutdown_grace_secs = 1;
    config
}

/// A running gateway.
pub struct TestGateway {
    pub shutdown: Shutdown,
    pub broker: Broker,
    addresses: Vec<(EndpointKind, SocketAddr)>,
    task: tokio::task::JoinHandle<()>,
}

impl TestGateway {
    pub fn addr(&self, kind: EndpointKind) -> SocketAddr {
        self.addresses
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, addr)| *addr)
            .unwrap_or_else(|| panic!("{kind} endpoint not enabled"))
    }

    pub fn url(&self, kind: EndpointKind, path: &str) -> String {
        format!("http://{}{}", self.addr(kind), path)
    }

    /// Trigger shutdown and wait for the server to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.task).await;
    }
}

pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let shutdown = Shutdown::new();
    let server = GatewayServer::bind(config, shutdown.clone()).await.unwrap();
    let broker = server.broker().clone();
    let addresses = EndpointKind::ALL
        .into_iter()
        .filter_map(|kind| server.local_addr(kind).map(|addr| (kind, addr)))
        .collect();

    let task = tokio::spawn(async move {
        server.run().await.unwrap();
    });

    TestGateway {
        shutdown,
        broker,
        addresses,
        task,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Poll until `check` holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
