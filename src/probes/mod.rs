//! Latency probes against candidate servers.

use crate::server::Server;
use std::time::Duration;

pub mod http;

pub use http::HttpLatencyProber;

/// Result of a single round-trip probe.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Reachable(Duration),
    /// The probe could not complete; never raised as an error.
    Unreachable { reason: String },
}

impl ProbeOutcome {
    pub fn rtt(&self) -> Option<Duration> {
        match self {
            ProbeOutcome::Reachable(d) => Some(*d),
            ProbeOutcome::Unreachable { .. } => None,
        }
    }

    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeOutcome::Reachable(_))
    }
}

/// One round-trip latency measurement against a server.
#[async_trait::async_trait]
pub trait LatencyProbe: Send + Sync {
    async fn probe(&self, server: &Server) -> ProbeOutcome;
}
