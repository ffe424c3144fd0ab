//! Server selection: distance sort, latency sampling, bounded randomization.

use crate::config::SelectionConfig;
use crate::probes::{LatencyProbe, ProbeOutcome};
use crate::server::{by_distance, Server};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("no candidate servers available")]
    NoServersAvailable,
}

/// What an unreachable probe sample does to a candidate's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnreachablePolicy {
    /// Any unreachable sample removes the candidate from contention.
    #[default]
    Disqualify,
    /// An unreachable sample adds nothing to the score. Biased towards dead
    /// servers; kept for parity with older clients.
    CountAsZero,
}

/// Sort servers by ascending distance, keeping input order on ties.
pub fn sort_by_distance(servers: &mut [Server]) {
    servers.sort_by(by_distance);
}

/// Picks one target server out of a directory listing.
pub struct ServerSelector {
    prober: Arc<dyn LatencyProbe>,
    candidates: usize,
    probes: u32,
    policy: UnreachablePolicy,
}

impl ServerSelector {
    pub fn new(prober: Arc<dyn LatencyProbe>, config: &SelectionConfig) -> Self {
        Self {
            prober,
            candidates: config.candidates.max(1),
            probes: config.probes.max(1),
            policy: config.unreachable,
        }
    }

    /// Select a server. With `randomize_window > 0` one of the closest
    /// `randomize_window` servers is drawn at random and left unprobed;
    /// otherwise the closest candidates are probed and the lowest total
    /// latency wins.
    pub async fn select(
        &self,
        servers: Vec<Server>,
        randomize_window: usize,
    ) -> Result<Server, SelectError> {
        let servers = prepare(servers)?;
        if randomize_window > 0 {
            return Ok(pick_random(servers, randomize_window, &mut rand::thread_rng()));
        }
        Ok(self.pick_by_latency(servers).await)
    }

    /// Same as [`select`](Self::select) with a caller-supplied RNG.
    pub async fn select_with_rng<R: Rng + Send>(
        &self,
        servers: Vec<Server>,
        randomize_window: usize,
        rng: &mut R,
    ) -> Result<Server, SelectError> {
        let servers = prepare(servers)?;
        if randomize_window > 0 {
            return Ok(pick_random(servers, randomize_window, rng));
        }
        Ok(self.pick_by_latency(servers).await)
    }

    async fn pick_by_latency(&self, mut servers: Vec<Server>) -> Server {
        let take = self.candidates.min(servers.len());
        let mut best: Option<(usize, Duration)> = None;

        for (idx, server) in servers.iter().take(take).enumerate() {
            let Some(score) = self.score(server).await else {
                continue;
            };
            debug!(server = %server.id, idx, score_ms = score.as_secs_f64() * 1000.0, "candidate scored");

            match best {
                Some((_, lowest)) if score >= lowest => {}
                _ => best = Some((idx, score)),
            }
        }

        match best {
            Some((idx, score)) => {
                let mut winner = servers.swap_remove(idx);
                let avg_ms = score.as_secs_f64() * 1000.0 / f64::from(self.probes);
                winner.record_latency(avg_ms);
                info!(
                    server = %winner.id,
                    name = %winner.name,
                    distance_km = winner.distance_km(),
                    latency_ms = avg_ms,
                    "selected best server"
                );
                winner
            }
            None => {
                warn!(
                    candidates = take,
                    "every candidate failed its latency probe, falling back to the closest server"
                );
                servers.swap_remove(0)
            }
        }
    }

    /// Sum of `probes` round trips, or `None` when disqualified.
    async fn score(&self, server: &Server) -> Option<Duration> {
        let mut total = Duration::ZERO;
        for _ in 0..self.probes {
            match self.prober.probe(server).await {
                ProbeOutcome::Reachable(rtt) => total += rtt,
                ProbeOutcome::Unreachable { reason } => {
                    warn!(server = %server.id, %reason, "latency probe unreachable");
                    if self.policy == UnreachablePolicy::Disqualify {
                        return None;
                    }
                }
            }
        }
        Some(total)
    }
}

fn prepare(mut servers: Vec<Server>) -> Result<Vec<Server>, SelectError> {
    if servers.is_empty() {
        return Err(SelectError::NoServersAvailable);
    }
    sort_by_distance(&mut servers);
    Ok(servers)
}

fn pick_random<R: Rng + ?Sized>(mut servers: Vec<Server>, window: usize, rng: &mut R) -> Server {
    let window = window.min(servers.len());
    let idx = rng.gen_range(0..window);
    info!(window, idx, "randomized server selection");
    servers.swap_remove(idx)
}
