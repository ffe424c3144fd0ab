//! Session engine: spawns the worker pool, waits on the join barrier and
//! aggregates.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use super::worker::Step;
use super::{
    aggregate, AggregateResult, Direction, TransferConfig, TransferError, TransferWorker,
    WorkerReport, MAX_TRANSFER_SIZE,
};
use crate::server::Endpoint;
use crate::transport::Transport;

/// Form field prefix expected by `upload.php` handlers.
const UPLOAD_PREFIX: &[u8] = b"content1=";

const UPLOAD_FILL: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub struct TransferEngine {
    transport: Arc<dyn Transport>,
}

impl TransferEngine {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Run one download or upload session against `target`.
    ///
    /// All workers run to completion (or their timeout); a failed worker is
    /// logged and excluded, and only a session without any completed worker
    /// is an error.
    pub async fn run_session(
        &self,
        direction: Direction,
        target: &Endpoint,
        config: &TransferConfig,
    ) -> Result<AggregateResult, TransferError> {
        config.validate(direction)?;
        let plan = build_plan(direction, target, config)?;

        let session_id = Uuid::new_v4();
        info!(
            session = %session_id,
            %direction,
            %target,
            workers = config.workers,
            steps_per_worker = plan.len(),
            "starting transfer session"
        );

        let started = Instant::now();
        let mut set = JoinSet::new();
        for id in 0..config.workers {
            let worker = TransferWorker::new(
                id,
                direction,
                Arc::clone(&self.transport),
                Arc::clone(&plan),
                config.repeat,
            );
            set.spawn(supervise(id, worker, config.timeout));
        }

        let mut reports = Vec::with_capacity(config.workers);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                // Workers are supervised and never panic out; this is only
                // reachable if the runtime is shutting down.
                Err(e) => warn!(session = %session_id, error = %e, "worker task lost"),
            }
        }
        let elapsed = started.elapsed();
        account_for_lost(&mut reports, config.workers);

        for report in reports.iter().filter(|r| !r.is_completed()) {
            if let Some(err) = &report.error {
                warn!(session = %session_id, %direction, worker = report.worker, error = %err, "transfer worker failed");
            }
        }

        let result = aggregate(direction, &reports, elapsed)?;
        info!(
            session = %session_id,
            %direction,
            bytes = result.total_bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            mbps = result.mbps(),
            failed = result.failed_workers,
            "transfer session complete"
        );
        Ok(result)
    }
}

/// Run a worker under its optional deadline, turning a panic or an expired
/// deadline into a failed report.
async fn supervise(id: usize, worker: TransferWorker, timeout: Option<Duration>) -> WorkerReport {
    let run = AssertUnwindSafe(worker.run()).catch_unwind();
    let outcome = match timeout {
        Some(after) => match tokio::time::timeout(after, run).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return WorkerReport::failed(id, TransferError::WorkerTimedOut { worker: id, after })
            }
        },
        None => run.await,
    };

    outcome.unwrap_or_else(|_| {
        WorkerReport::failed(
            id,
            TransferError::WorkerFailed {
                worker: id,
                reason: "worker panicked".to_string(),
            },
        )
    })
}

/// Record a failure for every worker whose report never made it back
/// through the barrier, so the session still accounts for the whole pool.
fn account_for_lost(reports: &mut Vec<WorkerReport>, workers: usize) {
    for id in 0..workers {
        if !reports.iter().any(|r| r.worker == id) {
            reports.push(WorkerReport::failed(
                id,
                TransferError::WorkerFailed {
                    worker: id,
                    reason: "worker task lost".to_string(),
                },
            ));
        }
    }
}

/// One pass over the exercised tiers. Workers repeat it `config.repeat`
/// times; upload bodies are shared between passes and workers.
fn build_plan(
    direction: Direction,
    target: &Endpoint,
    config: &TransferConfig,
) -> Result<Arc<[Step]>, TransferError> {
    let steps = match direction {
        Direction::Download => config
            .tiers()
            .iter()
            .map(|&size| Ok(Step::Get(target.download_url(size)?)))
            .collect::<Result<Vec<_>, TransferError>>()?,
        Direction::Upload => {
            let url = target.upload_url();
            config
                .tiers()
                .iter()
                .map(|&size| Ok(Step::Post(url.clone(), upload_payload(size)?)))
                .collect::<Result<Vec<_>, TransferError>>()?
        }
    };

    Ok(steps.into())
}

/// Form-encoded upload body of exactly `size` bytes.
pub fn upload_payload(size: u64) -> Result<Bytes, TransferError> {
    if size > MAX_TRANSFER_SIZE {
        return Err(oversized(size));
    }
    let size = usize::try_from(size).map_err(|_| oversized(size))?;
    let mut body = Vec::with_capacity(size);
    body.extend(UPLOAD_PREFIX.iter().take(size));
    body.extend(UPLOAD_FILL.iter().cycle().take(size - body.len()));
    Ok(Bytes::from(body))
}

fn oversized(size: u64) -> TransferError {
    TransferError::InvalidConfig {
        direction: Direction::Upload,
        reason: format!("payload of {} bytes exceeds {} bytes", size, MAX_TRANSFER_SIZE),
    }
}
