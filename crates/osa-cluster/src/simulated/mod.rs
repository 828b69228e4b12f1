mod drain;
mod space;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use osa_common::error::{HarnessError, Result};
use osa_common::types::{
    CommandResult, PoolHandle, PoolId, RebuildStatus, SpaceReport, TierSizes,
};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::client::ControlPlane;

pub const DEFAULT_SIM_RANKS: u32 = 4;
pub const DEFAULT_SIM_TARGETS_PER_RANK: u32 = 8;
pub const DEFAULT_SIM_REBUILD_BUSY_POLLS: usize = 2;

#[derive(Debug, Clone)]
pub struct SimulatedClusterConfig {
    pub ranks: u32,
    pub targets_per_rank: u32,
    pub capacity: TierSizes,
    /// Busy polls reported after each drain before the rebuild reports done.
    pub rebuild_busy_polls: usize,
}

impl Default for SimulatedClusterConfig {
    fn default() -> Self {
        Self {
            ranks: DEFAULT_SIM_RANKS,
            targets_per_rank: DEFAULT_SIM_TARGETS_PER_RANK,
            capacity: TierSizes::new(64 * 1_000_000_000, 1_024 * 1_000_000_000),
            rebuild_busy_polls: DEFAULT_SIM_REBUILD_BUSY_POLLS,
        }
    }
}

impl SimulatedClusterConfig {
    /// Two engines per server, as in a dual-socket deployment.
    pub fn for_servers(servers: usize) -> Self {
        Self {
            ranks: (servers as u32).saturating_mul(2).max(1),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainRecord {
    pub pool: PoolId,
    pub rank: u32,
    pub targets: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub(crate) struct SimPool {
    pub(crate) handle: PoolHandle,
    pub(crate) version: u64,
    pub(crate) used: TierSizes,
    pub(crate) drained: BTreeSet<(u32, u32)>,
    pub(crate) pending_rebuild: VecDeque<RebuildStatus>,
    pub(crate) last_rebuild: RebuildStatus,
}

#[derive(Debug, Default)]
pub(crate) struct Faults {
    pub(crate) fail_create_after: Option<usize>,
    pub(crate) reject_drains: Option<String>,
    pub(crate) freeze_version: bool,
    pub(crate) rebuild_script: Option<Vec<RebuildStatus>>,
}

#[derive(Debug, Default)]
pub(crate) struct ClusterState {
    pub(crate) pools: BTreeMap<PoolId, SimPool>,
    pub(crate) allocated: TierSizes,
    pub(crate) creates: usize,
    pub(crate) drains: Vec<DrainRecord>,
    pub(crate) faults: Faults,
}

impl ClusterState {
    pub(crate) fn pool(&self, id: &PoolId) -> Result<&SimPool> {
        self.pools
            .get(id)
            .ok_or_else(|| HarnessError::ControlPlane(format!("pool not found: {id}")))
    }

    pub(crate) fn pool_mut(&mut self, id: &PoolId) -> Result<&mut SimPool> {
        self.pools
            .get_mut(id)
            .ok_or_else(|| HarnessError::ControlPlane(format!("pool not found: {id}")))
    }
}

/// In-memory control plane. A drain marks targets out of the pool, bumps the
/// pool version and queues a rebuild sequence that `rebuild_status` walks one
/// poll at a time.
#[derive(Debug, Clone)]
pub struct SimulatedCluster {
    pub(crate) config: SimulatedClusterConfig,
    pub(crate) state: Arc<RwLock<ClusterState>>,
}

impl SimulatedCluster {
    pub fn new(config: SimulatedClusterConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(ClusterState::default())),
        }
    }

    pub fn config(&self) -> &SimulatedClusterConfig {
        &self.config
    }

    /// Every drain after this call reports `script` from `rebuild_status`, one entry per poll.
    /// The last entry repeats once the script is exhausted.
    pub async fn script_rebuild(&self, script: Vec<RebuildStatus>) {
        self.state.write().await.faults.rebuild_script = Some(script);
    }

    /// Pool creation fails once `count` pools have been created.
    pub async fn fail_create_after(&self, count: usize) {
        self.state.write().await.faults.fail_create_after = Some(count);
    }

    pub async fn reject_drains(&self, reason: impl Into<String>) {
        self.state.write().await.faults.reject_drains = Some(reason.into());
    }

    /// Drains stop bumping the pool version.
    pub async fn freeze_version(&self) {
        self.state.write().await.faults.freeze_version = true;
    }

    pub async fn drain_log(&self) -> Vec<DrainRecord> {
        self.state.read().await.drains.clone()
    }

    pub async fn pool_ids(&self) -> Vec<PoolId> {
        self.state.read().await.pools.keys().cloned().collect()
    }

    /// Account `bytes` of application data written into `pool`.
    pub async fn write(&self, pool: &PoolId, bytes: u64) -> Result<()> {
        let mut state = self.state.write().await;
        space::record_write(&self.config, &mut state, pool, bytes)
    }
}

#[async_trait]
impl ControlPlane for SimulatedCluster {
    async fn create_pool(&self, tiers: TierSizes) -> Result<PoolHandle> {
        if tiers.scm == 0 {
            return Err(HarnessError::PoolCreation(
                "scm size must be greater than zero".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        if let Some(limit) = state.faults.fail_create_after
            && state.creates >= limit
        {
            return Err(HarnessError::PoolCreation(format!(
                "injected failure after {limit} pools"
            )));
        }

        let free_scm = self.config.capacity.scm.saturating_sub(state.allocated.scm);
        let free_nvme = self.config.capacity.nvme.saturating_sub(state.allocated.nvme);
        if tiers.scm > free_scm || tiers.nvme > free_nvme {
            return Err(HarnessError::PoolCreation(format!(
                "insufficient cluster capacity: need scm={} nvme={}, free scm={free_scm} nvme={free_nvme}",
                tiers.scm, tiers.nvme
            )));
        }

        let handle = PoolHandle {
            id: PoolId::new(Uuid::new_v4().to_string()),
            tiers,
        };
        state.allocated.scm = state.allocated.scm.saturating_add(tiers.scm);
        state.allocated.nvme = state.allocated.nvme.saturating_add(tiers.nvme);
        state.creates += 1;
        state.pools.insert(
            handle.id.clone(),
            SimPool {
                handle: handle.clone(),
                version: 1,
                used: TierSizes::default(),
                drained: BTreeSet::new(),
                pending_rebuild: VecDeque::new(),
                last_rebuild: RebuildStatus::Done,
            },
        );
        info!(pool = %handle.id, scm = tiers.scm, nvme = tiers.nvme, "simulated pool created");
        Ok(handle)
    }

    async fn destroy_pool(&self, pool: &PoolId) -> Result<()> {
        let mut state = self.state.write().await;
        let removed = state
            .pools
            .remove(pool)
            .ok_or_else(|| HarnessError::ControlPlane(format!("pool not found: {pool}")))?;
        state.allocated.scm = state.allocated.scm.saturating_sub(removed.handle.tiers.scm);
        state.allocated.nvme = state.allocated.nvme.saturating_sub(removed.handle.tiers.nvme);
        Ok(())
    }

    async fn drain(&self, pool: &PoolId, rank: u32, targets: &str) -> Result<CommandResult> {
        drain::start_drain(self, pool, rank, targets).await
    }

    async fn pool_version(&self, pool: &PoolId) -> Result<u64> {
        Ok(self.state.read().await.pool(pool)?.version)
    }

    async fn rebuild_status(&self, pool: &PoolId) -> Result<RebuildStatus> {
        let mut state = self.state.write().await;
        let sim = state.pool_mut(pool)?;
        if let Some(next) = sim.pending_rebuild.pop_front() {
            sim.last_rebuild = next;
        }
        Ok(sim.last_rebuild)
    }

    async fn space_usage(&self, pool: &PoolId) -> Result<SpaceReport> {
        let state = self.state.read().await;
        Ok(space::report(&self.config, state.pool(pool)?))
    }
}

#[cfg(test)]
mod tests {
    use osa_common::types::{RebuildStatus, TierSizes};

    use super::{SimulatedCluster, SimulatedClusterConfig};
    use crate::client::ControlPlane;

    fn cluster() -> SimulatedCluster {
        SimulatedCluster::new(SimulatedClusterConfig {
            ranks: 4,
            targets_per_rank: 8,
            capacity: TierSizes::new(8_000, 80_000),
            rebuild_busy_polls: 2,
        })
    }

    #[tokio::test]
    async fn create_respects_capacity_and_faults() {
        let cluster = cluster();
        let pool = cluster.create_pool(TierSizes::new(4_000, 40_000)).await.unwrap();
        assert_eq!(cluster.pool_version(&pool.id).await.unwrap(), 1);
        assert!(cluster.create_pool(TierSizes::new(5_000, 1)).await.is_err());

        cluster.fail_create_after(1).await;
        let err = cluster
            .create_pool(TierSizes::new(1_000, 1_000))
            .await
            .unwrap_err();
        assert_eq!(err.stage(), "creation");

        cluster.destroy_pool(&pool.id).await.unwrap();
        assert!(cluster.pool_version(&pool.id).await.is_err());
    }

    #[tokio::test]
    async fn drain_bumps_version_and_rebuilds() {
        let cluster = cluster();
        let pool = cluster.create_pool(TierSizes::new(4_000, 40_000)).await.unwrap();

        let result = cluster.drain(&pool.id, 2, "4,5").await.unwrap();
        assert!(result.is_success(), "{result:?}");
        assert_eq!(cluster.pool_version(&pool.id).await.unwrap(), 2);

        let observed = [
            cluster.rebuild_status(&pool.id).await.unwrap(),
            cluster.rebuild_status(&pool.id).await.unwrap(),
            cluster.rebuild_status(&pool.id).await.unwrap(),
            cluster.rebuild_status(&pool.id).await.unwrap(),
        ];
        assert_eq!(
            observed,
            [
                RebuildStatus::Busy,
                RebuildStatus::Busy,
                RebuildStatus::Done,
                RebuildStatus::Done
            ]
        );

        let log = cluster.drain_log().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].rank, 2);
        assert_eq!(log[0].targets, "4,5");
    }

    #[tokio::test]
    async fn scripted_rebuild_replays_per_drain() {
        let cluster = cluster();
        cluster
            .script_rebuild(vec![RebuildStatus::Busy, RebuildStatus::Failed])
            .await;
        let pool = cluster.create_pool(TierSizes::new(1_000, 1_000)).await.unwrap();
        cluster.drain(&pool.id, 1, "0,1").await.unwrap();
        assert_eq!(cluster.rebuild_status(&pool.id).await.unwrap(), RebuildStatus::Busy);
        assert_eq!(cluster.rebuild_status(&pool.id).await.unwrap(), RebuildStatus::Failed);
        assert_eq!(cluster.rebuild_status(&pool.id).await.unwrap(), RebuildStatus::Failed);
    }
}
