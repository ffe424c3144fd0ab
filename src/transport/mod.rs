//! Request/response transfer primitive used by probes and transfer workers.

use bytes::Bytes;
use reqwest::Url;
use thiserror::Error;

pub mod http;

pub use http::HttpTransport;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("body transfer with {url} broke off: {reason}")]
    Body { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// One request/response call per worker step.
///
/// Implementations must count payload bytes only, never headers.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// GET `url` and read the body to the end. Returns body bytes received.
    async fn get(&self, url: &Url) -> Result<u64, TransportError>;

    /// POST `body` to `url`. Returns bytes sent once the server answered
    /// with a success status.
    async fn post(&self, url: &Url, body: Bytes) -> Result<u64, TransportError>;
}
