use std::sync::Arc;
use std::time::Duration;

use osa_cluster::ControlPlane;
use osa_common::error::{HarnessError, Result};
use osa_common::types::{DrainTarget, PoolHandle, PoolId, RebuildStatus};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ScenarioConfig;

/// Picks the rank uniformly from `[1, 2 * server_count - 1]` and a contiguous
/// target pair `(n, n + 1)` with `n` uniform in `[0, targets_per_rank - 2]`.
pub fn select_drain_target<R: Rng>(
    rng: &mut R,
    server_count: usize,
    targets_per_rank: u32,
) -> Result<DrainTarget> {
    let max_rank = (server_count as u32).saturating_mul(2).saturating_sub(1);
    if max_rank == 0 {
        return Err(HarnessError::InvalidConfig(
            "cannot pick a drain rank without servers".to_string(),
        ));
    }
    if targets_per_rank < 2 {
        return Err(HarnessError::InvalidConfig(format!(
            "need at least two targets per rank, got {targets_per_rank}"
        )));
    }

    let rank = rng.random_range(1..=max_rank);
    let first = rng.random_range(0..=targets_per_rank - 2);
    Ok(DrainTarget::new(rank, first))
}

#[derive(Debug, Clone, Copy)]
pub struct DrainSettings {
    pub poll_interval: Duration,
    pub min_polls: u32,
    pub max_polls: u32,
}

impl DrainSettings {
    pub fn from_config(config: &ScenarioConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            min_polls: config.min_polls,
            max_polls: config.max_polls,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainOutcome {
    pub pool: PoolId,
    pub target: DrainTarget,
    pub pver_begin: u64,
    pub pver_end: u64,
    pub success: bool,
    pub polls: u32,
}

pub struct DrainOrchestrator {
    control: Arc<dyn ControlPlane>,
    settings: DrainSettings,
}

impl DrainOrchestrator {
    pub fn new(control: Arc<dyn ControlPlane>, settings: DrainSettings) -> Self {
        Self { control, settings }
    }

    /// Drains `target` out of `pool` and waits for the rebuild.
    ///
    /// The pool version is read right before the drain command and again after
    /// the poll loop exits.
    pub async fn drain_and_wait(&self, pool: &PoolHandle, target: DrainTarget) -> Result<DrainOutcome> {
        let targets = target.target_csv();
        let pver_begin = self.control.pool_version(&pool.id).await?;
        info!(pool = %pool.id, pver_begin, "pool version before drain");

        let result = self.control.drain(&pool.id, target.rank, &targets).await?;
        if !result.is_success() {
            return Err(HarnessError::DrainInvocation {
                pool: pool.id.to_string(),
                rank: target.rank,
                targets,
                reason: result
                    .error
                    .unwrap_or_else(|| format!("status {}", result.status)),
            });
        }
        info!(pool = %pool.id, rank = target.rank, targets = %targets, output = %result.output.trim(), "drain issued");

        let polls = self.wait_for_rebuild(&pool.id).await?;

        let pver_end = self.control.pool_version(&pool.id).await?;
        info!(pool = %pool.id, pver_end, polls, "pool version after drain");

        Ok(DrainOutcome {
            pool: pool.id.clone(),
            target,
            pver_begin,
            pver_end,
            success: true,
            polls,
        })
    }

    /// Polls until the rebuild reports done on or after the `min_polls`-th poll.
    /// A done status seen earlier does not end the loop, since it can flip back to busy.
    pub async fn wait_for_rebuild(&self, pool: &PoolId) -> Result<u32> {
        let DrainSettings {
            poll_interval,
            min_polls,
            max_polls,
        } = self.settings;
        let mut last_status = RebuildStatus::Busy;

        for poll in 1..=max_polls {
            let status = self.control.rebuild_status(pool).await?;
            debug!(pool = %pool, poll, %status, "rebuild status");

            match status {
                RebuildStatus::Failed => {
                    warn!(pool = %pool, poll, "rebuild failed");
                    return Err(HarnessError::DrainFailed {
                        pool: pool.to_string(),
                        polls: poll,
                        last_status: status,
                    });
                }
                RebuildStatus::Done if poll >= min_polls => {
                    info!(pool = %pool, poll, "rebuild done");
                    return Ok(poll);
                }
                _ => {}
            }
            last_status = status;

            if poll < max_polls {
                tokio::time::sleep(poll_interval).await;
            }
        }

        Err(HarnessError::DrainFailed {
            pool: pool.to_string(),
            polls: max_polls,
            last_status,
        })
    }
}
