use super::{Transport, TransportError};
use crate::config::HttpConfig;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, Url};
use std::time::Duration;
use tracing::trace;

/// `reqwest`-backed transport shared by the prober and all transfer workers.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone());
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client (tests, custom TLS setups).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn check_status(url: &Url, resp: Response) -> Result<Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(TransportError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &Url) -> Result<u64, TransportError> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let resp = check_status(url, resp)?;

        let mut received: u64 = 0;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TransportError::Body {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            received += chunk.len() as u64;
        }

        trace!(%url, received, "GET complete");
        Ok(received)
    }

    async fn post(&self, url: &Url, body: Bytes) -> Result<u64, TransportError> {
        let sent = body.len() as u64;
        let resp = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let resp = check_status(url, resp)?;

        // The server's reply confirms the upload; drain it so the
        // connection can be reused.
        resp.bytes().await.map_err(|e| TransportError::Body {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        trace!(%url, sent, "POST complete");
        Ok(sent)
    }
}
