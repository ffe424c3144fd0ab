use super::{LatencyProbe, ProbeOutcome};
use crate::server::Server;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// HTTP probe: fetches the server's `latency.txt` and times the round trip
/// from send to the last body byte.
pub struct HttpLatencyProber {
    transport: Arc<dyn Transport>,
}

impl HttpLatencyProber {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait::async_trait]
impl LatencyProbe for HttpLatencyProber {
    async fn probe(&self, server: &Server) -> ProbeOutcome {
        let mut url = match server.endpoint().and_then(|ep| ep.latency_url()) {
            Ok(url) => url,
            Err(e) => {
                return ProbeOutcome::Unreachable {
                    reason: e.to_string(),
                }
            }
        };

        // Cache buster, so intermediate proxies can't answer for the server.
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        url.query_pairs_mut().append_pair("x", &stamp.to_string());

        let start = Instant::now();
        match self.transport.get(&url).await {
            Ok(_) => {
                let rtt = start.elapsed();
                debug!(server = %server.id, rtt_ms = rtt.as_secs_f64() * 1000.0, "latency probe");
                ProbeOutcome::Reachable(rtt)
            }
            Err(e) => {
                debug!(server = %server.id, error = %e, "latency probe failed");
                ProbeOutcome::Unreachable {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use bytes::Bytes;
    use reqwest::Url;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        fail: bool,
        urls: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Transport for RecordingTransport {
        async fn get(&self, url: &Url) -> Result<u64, TransportError> {
            self.urls.lock().unwrap().push(url.to_string());
            if self.fail {
                Err(TransportError::Connect {
                    url: url.to_string(),
                    reason: "connection refused".into(),
                })
            } else {
                Ok(10)
            }
        }

        async fn post(&self, _url: &Url, body: Bytes) -> Result<u64, TransportError> {
            Ok(body.len() as u64)
        }
    }

    fn server(url: &str) -> Server {
        Server::new("42", "Town", "ISP", "PL", url, 1.0)
    }

    #[tokio::test]
    async fn test_probe_hits_latency_file() {
        let transport = Arc::new(RecordingTransport::default());
        let prober = HttpLatencyProber::new(transport.clone());

        let outcome = prober
            .probe(&server("http://speed.example.net/speedtest/upload.php"))
            .await;

        assert!(outcome.is_reachable());
        let urls = transport.urls.lock().unwrap();
        assert_eq!(urls.len(), 1);
        assert!(urls[0].starts_with("http://speed.example.net/speedtest/latency.txt?x="));
    }

    #[tokio::test]
    async fn test_transport_failure_is_unreachable() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let prober = HttpLatencyProber::new(transport);

        let outcome = prober
            .probe(&server("http://speed.example.net/speedtest/upload.php"))
            .await;
        assert!(matches!(outcome, ProbeOutcome::Unreachable { .. }));
        assert_eq!(outcome.rtt(), None);
    }

    #[tokio::test]
    async fn test_malformed_url_never_touches_network() {
        let transport = Arc::new(RecordingTransport::default());
        let prober = HttpLatencyProber::new(transport.clone());

        let outcome = prober.probe(&server("::not-a-url::")).await;
        assert!(!outcome.is_reachable());
        assert!(transport.urls.lock().unwrap().is_empty());
    }
}
