use std::sync::Arc;

use osa_cluster::ControlPlane;
use osa_common::error::{HarnessError, Result};
use osa_common::types::{PoolHandle, PoolId, PoolState, SpaceReport, TierSizes};
use tracing::{info, warn};

#[derive(Debug, Clone)]
struct ManagedPool {
    handle: PoolHandle,
    state: PoolState,
}

/// Owns the pools of one pool-count iteration from creation to teardown.
pub struct PoolLifecycleManager {
    control: Arc<dyn ControlPlane>,
    pools: Vec<ManagedPool>,
}

impl PoolLifecycleManager {
    pub fn new(control: Arc<dyn ControlPlane>) -> Self {
        Self {
            control,
            pools: Vec::new(),
        }
    }

    /// Creates `count` pools sharing `total` evenly. Stops at the first failure;
    /// pools created before it stay tracked so teardown can find them.
    pub async fn create_pools(&mut self, count: usize, total: TierSizes) -> Result<Vec<PoolHandle>> {
        let share = total.split(count)?;
        let mut created = Vec::with_capacity(count);

        for index in 0..count {
            let handle = self.control.create_pool(share).await.map_err(|err| match err {
                HarnessError::PoolCreation(_) => err,
                other => HarnessError::PoolCreation(other.to_string()),
            })?;
            info!(
                pool = %handle.id,
                index,
                scm = share.scm,
                nvme = share.nvme,
                "pool created"
            );
            self.pools.push(ManagedPool {
                handle: handle.clone(),
                state: PoolState::Created,
            });
            created.push(handle);
        }

        Ok(created)
    }

    pub fn handles(&self) -> Vec<PoolHandle> {
        self.pools.iter().map(|pool| pool.handle.clone()).collect()
    }

    pub fn state(&self, pool: &PoolId) -> PoolState {
        self.pools
            .iter()
            .find(|managed| &managed.handle.id == pool)
            .map(|managed| managed.state)
            .unwrap_or(PoolState::Absent)
    }

    pub fn set_state(&mut self, pool: &PoolId, state: PoolState) -> Result<()> {
        let managed = self
            .pools
            .iter_mut()
            .find(|managed| &managed.handle.id == pool)
            .ok_or_else(|| HarnessError::ControlPlane(format!("untracked pool: {pool}")))?;
        managed.state = state;
        Ok(())
    }

    pub async fn report_space(&self, pool: &PoolId, label: &str) -> Result<SpaceReport> {
        let report = self.control.space_usage(pool).await?;
        for tier in &report.tiers {
            info!(
                pool = %pool,
                label,
                tier = %tier.tier,
                total = tier.total,
                free = tier.free,
                used = tier.used(),
                "pool space"
            );
        }
        Ok(report)
    }

    /// Destroys every tracked pool that is not destroyed yet. Keeps going after a
    /// failure and returns the first error.
    pub async fn destroy_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for managed in self.pools.iter_mut() {
            if managed.state == PoolState::Destroyed {
                continue;
            }
            match self.control.destroy_pool(&managed.handle.id).await {
                Ok(()) => {
                    managed.state = PoolState::Destroyed;
                    info!(pool = %managed.handle.id, "pool destroyed");
                }
                Err(err) => {
                    warn!(pool = %managed.handle.id, error = %err, "pool destroy failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use osa_cluster::{SimulatedCluster, SimulatedClusterConfig};
    use osa_common::types::{PoolId, PoolState, TierSizes};

    use super::PoolLifecycleManager;

    #[tokio::test]
    async fn creates_even_shares_and_tears_down() {
        let cluster = SimulatedCluster::new(SimulatedClusterConfig::default());
        let mut manager = PoolLifecycleManager::new(Arc::new(cluster.clone()));

        let pools = manager
            .create_pools(3, TierSizes::new(1_000, 10_001))
            .await
            .unwrap();
        assert_eq!(pools.len(), 3);
        for pool in &pools {
            assert_eq!(pool.tiers, TierSizes::new(333, 3_333));
            assert_eq!(manager.state(&pool.id), PoolState::Created);
        }
        assert_eq!(manager.state(&PoolId::new("missing")), PoolState::Absent);

        let space = manager.report_space(&pools[0].id, "start").await.unwrap();
        assert_eq!(space.used(), 0);

        manager.destroy_all().await.unwrap();
        assert_eq!(manager.state(&pools[2].id), PoolState::Destroyed);
        assert!(cluster.pool_ids().await.is_empty());
    }

    #[tokio::test]
    async fn creation_fails_fast() {
        let cluster = SimulatedCluster::new(SimulatedClusterConfig::default());
        cluster.fail_create_after(1).await;
        let mut manager = PoolLifecycleManager::new(Arc::new(cluster.clone()));

        let err = manager
            .create_pools(2, TierSizes::new(2_000, 2_000))
            .await
            .unwrap_err();
        assert_eq!(err.stage(), "creation");
        assert_eq!(manager.handles().len(), 1);

        manager.destroy_all().await.unwrap();
        assert!(cluster.pool_ids().await.is_empty());
    }
}
