//! A single transfer worker.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use reqwest::Url;
use serde::Serialize;
use tracing::{debug, trace};

use super::{Direction, TransferError, WorkerReport};
use crate::transport::Transport;

/// Worker lifecycle. `Failed` is reachable from `Connecting` and
/// `Transferring`; there are no retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Connecting,
    Transferring,
    Completed,
    Failed,
}

/// One request in a worker's plan. `Get` URLs get a per-request
/// cache-buster appended by the worker.
#[derive(Debug, Clone)]
pub enum Step {
    Get(Url),
    Post(Url, Bytes),
}

/// Runs a shared, read-only single-pass plan `repeat` times and reports
/// what it moved.
pub struct TransferWorker {
    id: usize,
    direction: Direction,
    transport: Arc<dyn Transport>,
    plan: Arc<[Step]>,
    repeat: u32,
    state: WorkerState,
}

impl TransferWorker {
    pub fn new(
        id: usize,
        direction: Direction,
        transport: Arc<dyn Transport>,
        plan: Arc<[Step]>,
        repeat: u32,
    ) -> Self {
        Self {
            id,
            direction,
            transport,
            plan,
            repeat,
            state: WorkerState::Idle,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    fn transition(&mut self, next: WorkerState) {
        trace!(worker = self.id, direction = %self.direction, from = ?self.state, to = ?next, "worker state");
        self.state = next;
    }

    /// Execute every step in order. The clock starts before the first
    /// request and stops after the last byte is confirmed.
    pub async fn run(mut self) -> WorkerReport {
        let start = Instant::now();
        self.transition(WorkerState::Connecting);

        let mut bytes: u64 = 0;
        let plan = Arc::clone(&self.plan);
        let steps = (0..self.repeat)
            .flat_map(|pass| std::iter::repeat(pass).zip(plan.iter().enumerate()));
        for (pass, (n, step)) in steps {
            let result = match step {
                Step::Get(url) => {
                    // Distinct per worker, pass and tier.
                    let mut url = url.clone();
                    url.query_pairs_mut()
                        .append_pair("x", &format!("{}.{}.{}", self.id, pass, n));
                    self.transport.get(&url).await
                }
                Step::Post(url, body) => self.transport.post(url, body.clone()).await,
            };

            match result {
                Ok(moved) => {
                    bytes += moved;
                    if self.state == WorkerState::Connecting {
                        self.transition(WorkerState::Transferring);
                    }
                }
                Err(e) => {
                    self.transition(WorkerState::Failed);
                    return WorkerReport::failed(
                        self.id,
                        TransferError::WorkerFailed {
                            worker: self.id,
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }

        let elapsed = start.elapsed();
        self.transition(WorkerState::Completed);
        debug!(
            worker = self.id,
            direction = %self.direction,
            bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            "worker finished"
        );
        WorkerReport::completed(self.id, bytes, elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Serves every GET with `size` bytes and fails the call numbered
    /// `fail_at` (0-based), if set.
    struct CountingTransport {
        size: u64,
        fail_at: Option<usize>,
        calls: AtomicUsize,
        urls: Mutex<Vec<String>>,
    }

    impl CountingTransport {
        fn new(size: u64, fail_at: Option<usize>) -> Self {
            Self {
                size,
                fail_at,
                calls: AtomicUsize::new(0),
                urls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Transport for CountingTransport {
        async fn get(&self, url: &Url) -> Result<u64, TransportError> {
            self.urls.lock().unwrap().push(url.to_string());
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(n) == self.fail_at {
                return Err(TransportError::Body {
                    url: url.to_string(),
                    reason: "reset by peer".into(),
                });
            }
            Ok(self.size)
        }

        async fn post(&self, _url: &Url, body: Bytes) -> Result<u64, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(body.len() as u64)
        }
    }

    fn url() -> Url {
        Url::parse("http://speed.example.net/speedtest/random350x350.jpg").unwrap()
    }

    #[tokio::test]
    async fn test_worker_sums_every_step() {
        let transport = Arc::new(CountingTransport::new(1_000, None));
        let plan: Arc<[Step]> = vec![Step::Get(url()), Step::Get(url()), Step::Get(url())].into();
        let worker = TransferWorker::new(0, Direction::Download, transport.clone(), plan, 1);
        assert_eq!(worker.state(), WorkerState::Idle);

        let report = worker.run().await;
        assert!(report.is_completed());
        assert_eq!(report.bytes, 3_000);
        assert!(report.error.is_none());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_upload_counts_payload_bytes() {
        let transport = Arc::new(CountingTransport::new(0, None));
        let plan: Arc<[Step]> = vec![
            Step::Post(url(), Bytes::from(vec![b'a'; 100])),
            Step::Post(url(), Bytes::from(vec![b'a'; 250])),
        ]
        .into();
        let report = TransferWorker::new(1, Direction::Upload, transport, plan, 1)
            .run()
            .await;
        assert_eq!(report.worker, 1);
        assert_eq!(report.bytes, 350);
    }

    #[tokio::test]
    async fn test_failure_mid_transfer_stops_and_zeroes() {
        let transport = Arc::new(CountingTransport::new(1_000, Some(1)));
        let plan: Arc<[Step]> = vec![Step::Get(url()), Step::Get(url()), Step::Get(url())].into();
        let report = TransferWorker::new(2, Direction::Download, transport.clone(), plan, 1)
            .run()
            .await;

        assert_eq!(report.state, WorkerState::Failed);
        assert_eq!(report.bytes, 0);
        assert!(report.elapsed.is_zero());
        assert!(matches!(
            report.error,
            Some(TransferError::WorkerFailed { worker: 2, .. })
        ));
        // No retries and no further steps after the failure.
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_repeat_walks_the_plan_again_with_fresh_urls() {
        let transport = Arc::new(CountingTransport::new(10, None));
        let plan: Arc<[Step]> = vec![Step::Get(url()), Step::Get(url())].into();
        let report = TransferWorker::new(7, Direction::Download, transport.clone(), plan, 3)
            .run()
            .await;

        assert_eq!(report.bytes, 60);
        let urls = transport.urls.lock().unwrap();
        assert_eq!(urls.len(), 6);
        assert!(urls[0].ends_with("random350x350.jpg?x=7.0.0"));
        assert!(urls[5].ends_with("random350x350.jpg?x=7.2.1"));
        let distinct: std::collections::HashSet<&String> = urls.iter().collect();
        assert_eq!(distinct.len(), 6);
    }
}
