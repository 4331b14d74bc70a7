//! Endpoint definitions.
//!
//! Four logical endpoints share one hostname; each pairs a transport with an
//! authentication policy.

use serde::{Deserialize, Serialize};

/// The trust domain a connection arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// Plaintext, public. CA-adjacent protocols and bootstrap redirects.
    Plaintext,
    /// Server-authenticated TLS, public. Web interface.
    Tls,
    /// TLS requesting an optional client certificate.
    MutualTls,
    /// Plaintext on loopback only. Message publication.
    LoopbackPublish,
}

/// Transport used by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Plaintext,
    Tls,
}

impl EndpointKind {
    pub const ALL: [EndpointKind; 4] = [
        EndpointKind::Plaintext,
        EndpointKind::Tls,
        EndpointKind::MutualTls,
        EndpointKind::LoopbackPublish,
    ];

    pub fn transport(self) -> Transport {
        match self {
            EndpointKind::Tls | EndpointKind::MutualTls => Transport::Tls,
            EndpointKind::Plaintext | EndpointKind::LoopbackPublish => Transport::Plaintext,
        }
    }

    /// Scheme reported to upstreams in `X-Forwarded-Proto`.
    pub fn scheme(self) -> &'static str {
        match self.transport() {
            Transport::Tls => "https",
            Transport::Plaintext => "http",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EndpointKind::Plaintext => "plaintext",
            EndpointKind::Tls => "tls",
            EndpointKind::MutualTls => "mutual_tls",
            EndpointKind::LoopbackPublish => "loopback_publish",
        }
    }
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
