//! Throughput measurement: a pool of concurrent transfer workers per session.
//!
//! A session is one direction (download or upload) against one endpoint.
//! Workers share a read-only [`TransferConfig`], return a [`WorkerReport`]
//! each, and the engine folds those into an [`AggregateResult`] after the
//! join barrier.

pub mod engine;
pub mod report;
pub mod worker;

pub use engine::TransferEngine;
pub use worker::{TransferWorker, WorkerState};

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::server::EndpointError;

/// Upper bound on concurrent workers per session.
pub const MAX_WORKERS: usize = 64;

/// Upper bound on passes per worker.
pub const MAX_REPEAT: u32 = 10_000;

/// Largest single object or payload, 1 GiB.
pub const MAX_TRANSFER_SIZE: u64 = 1 << 30;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("invalid {direction} configuration: {reason}")]
    InvalidConfig { direction: Direction, reason: String },

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error("worker {worker} failed: {reason}")]
    WorkerFailed { worker: usize, reason: String },

    #[error("worker {worker} timed out after {after:?}")]
    WorkerTimedOut { worker: usize, after: Duration },

    #[error("{direction} session failed: all {workers} workers failed")]
    SessionFailed { direction: Direction, workers: usize },
}

/// Transfer direction of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Download,
    Upload,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Download => write!(f, "download"),
            Direction::Upload => write!(f, "upload"),
        }
    }
}

/// Per-direction session configuration. Immutable once a session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Concurrent workers in the session.
    pub workers: usize,
    /// Object (download) or payload (upload) sizes in bytes, smallest first.
    pub sizes: Vec<u64>,
    /// How many leading entries of `sizes` each worker exercises.
    pub length: usize,
    /// Passes over the exercised tiers per worker.
    pub repeat: u32,
    /// Per-worker deadline; an expired worker is cancelled and counted failed.
    pub timeout: Option<Duration>,
}

impl TransferConfig {
    /// One ~30 MB object per worker, four workers.
    pub fn download_defaults() -> Self {
        Self {
            workers: 4,
            sizes: vec![31_625_365],
            length: 1,
            repeat: 1,
            timeout: None,
        }
    }

    /// Three growing payloads per worker, two workers.
    pub fn upload_defaults() -> Self {
        Self {
            workers: 2,
            sizes: vec![262_144, 524_288, 1_048_576, 2_097_152, 4_194_304],
            length: 3,
            repeat: 1,
            timeout: None,
        }
    }

    pub fn validate(&self, direction: Direction) -> Result<(), TransferError> {
        let reason = if self.workers == 0 {
            "worker count must be at least 1".to_string()
        } else if self.sizes.is_empty() {
            "at least one size is required".to_string()
        } else if self.length == 0 {
            "length must be at least 1".to_string()
        } else if self.repeat == 0 {
            "repeat must be at least 1".to_string()
        } else if self.workers > MAX_WORKERS {
            format!("worker count {} exceeds {}", self.workers, MAX_WORKERS)
        } else if self.repeat > MAX_REPEAT {
            format!("repeat {} exceeds {}", self.repeat, MAX_REPEAT)
        } else if let Some(size) = self.sizes.iter().find(|&&s| s > MAX_TRANSFER_SIZE) {
            format!("size {} exceeds {} bytes", size, MAX_TRANSFER_SIZE)
        } else {
            return Ok(());
        };
        Err(TransferError::InvalidConfig { direction, reason })
    }

    /// Sizes actually exercised: the first `length` tiers.
    pub fn tiers(&self) -> &[u64] {
        &self.sizes[..self.length.min(self.sizes.len())]
    }
}

/// What one worker hands back through the join barrier.
#[derive(Debug)]
pub struct WorkerReport {
    pub worker: usize,
    pub bytes: u64,
    pub elapsed: Duration,
    pub state: WorkerState,
    pub error: Option<TransferError>,
}

impl WorkerReport {
    pub fn completed(worker: usize, bytes: u64, elapsed: Duration) -> Self {
        Self {
            worker,
            bytes,
            elapsed,
            state: WorkerState::Completed,
            error: None,
        }
    }

    /// A failed worker contributes nothing: `(0, 0)`.
    pub fn failed(worker: usize, error: TransferError) -> Self {
        Self {
            worker,
            bytes: 0,
            elapsed: Duration::ZERO,
            state: WorkerState::Failed,
            error: Some(error),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == WorkerState::Completed
    }
}

/// Session totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub direction: Direction,
    pub total_bytes: u64,
    #[serde(rename = "elapsed_secs", serialize_with = "as_secs_f64")]
    pub elapsed: Duration,
    pub bits_per_second: f64,
    pub workers: usize,
    pub failed_workers: usize,
}

impl AggregateResult {
    pub fn mbps(&self) -> f64 {
        self.bits_per_second / 1_000_000.0
    }
}

fn as_secs_f64<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Fold worker reports into session throughput.
///
/// Throughput is total bytes of completed workers over the session's wall
/// clock, never the sum or mean of per-worker times.
pub fn aggregate(
    direction: Direction,
    reports: &[WorkerReport],
    session_elapsed: Duration,
) -> Result<AggregateResult, TransferError> {
    let completed: Vec<&WorkerReport> = reports.iter().filter(|r| r.is_completed()).collect();
    if completed.is_empty() {
        return Err(TransferError::SessionFailed {
            direction,
            workers: reports.len(),
        });
    }

    let total_bytes: u64 = completed.iter().map(|r| r.bytes).sum();
    let secs = session_elapsed.as_secs_f64().max(1e-6);

    Ok(AggregateResult {
        direction,
        total_bytes,
        elapsed: session_elapsed,
        bits_per_second: total_bytes as f64 * 8.0 / secs,
        workers: reports.len(),
        failed_workers: reports.len() - completed.len(),
    })
}
