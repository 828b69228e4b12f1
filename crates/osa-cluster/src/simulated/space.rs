use osa_common::error::{HarnessError, Result};
use osa_common::types::{PoolId, SpaceReport, TierSizes, TierSpace};

use crate::simulated::{ClusterState, SimPool, SimulatedClusterConfig};

pub(crate) fn total_targets(config: &SimulatedClusterConfig) -> u64 {
    u64::from(config.ranks) * u64::from(config.targets_per_rank)
}

pub(crate) fn active_targets(config: &SimulatedClusterConfig, pool: &SimPool) -> u64 {
    total_targets(config).saturating_sub(pool.drained.len() as u64)
}

/// Share of `tiers` backed by `targets` of the cluster's targets.
pub(crate) fn capacity_for(
    config: &SimulatedClusterConfig,
    tiers: &TierSizes,
    targets: u64,
) -> TierSizes {
    let total = total_targets(config);
    if total == 0 {
        return TierSizes::default();
    }
    let scale = |bytes: u64| {
        let value = u128::from(bytes) * u128::from(targets) / u128::from(total);
        u64::try_from(value).unwrap_or(u64::MAX)
    };
    TierSizes::new(scale(tiers.scm), scale(tiers.nvme))
}

pub(crate) fn report(config: &SimulatedClusterConfig, pool: &SimPool) -> SpaceReport {
    let capacity = capacity_for(config, &pool.handle.tiers, active_targets(config, pool));
    SpaceReport {
        pool: pool.handle.id.clone(),
        tiers: vec![
            TierSpace {
                tier: "scm".to_string(),
                total: capacity.scm,
                free: capacity.scm.saturating_sub(pool.used.scm),
            },
            TierSpace {
                tier: "nvme".to_string(),
                total: capacity.nvme,
                free: capacity.nvme.saturating_sub(pool.used.nvme),
            },
        ],
    }
}

/// Data lands on the capacity tier when the pool has one, else on scm.
pub(crate) fn record_write(
    config: &SimulatedClusterConfig,
    state: &mut ClusterState,
    pool_id: &PoolId,
    bytes: u64,
) -> Result<()> {
    let pool = state.pool_mut(pool_id)?;
    let capacity = capacity_for(config, &pool.handle.tiers, active_targets(config, pool));

    let (used, limit) = if capacity.nvme > 0 {
        (&mut pool.used.nvme, capacity.nvme)
    } else {
        (&mut pool.used.scm, capacity.scm)
    };

    let wanted = used.saturating_add(bytes);
    if wanted > limit {
        return Err(HarnessError::Workload(format!(
            "DER_NOSPACE: pool {pool_id} cannot hold {bytes} more bytes ({} of {limit} used)",
            *used
        )));
    }
    *used = wanted;
    Ok(())
}

#[cfg(test)]
mod tests {
    use osa_common::types::TierSizes;

    use crate::client::ControlPlane;
    use crate::simulated::{SimulatedCluster, SimulatedClusterConfig};

    #[tokio::test]
    async fn drained_targets_shrink_reported_capacity() {
        let cluster = SimulatedCluster::new(SimulatedClusterConfig {
            ranks: 2,
            targets_per_rank: 8,
            ..SimulatedClusterConfig::default()
        });
        let pool = cluster.create_pool(TierSizes::new(1_600, 16_000)).await.unwrap();
        cluster.write(&pool.id, 4_000).await.unwrap();

        let before = cluster.space_usage(&pool.id).await.unwrap();
        assert_eq!(before.tiers[1].total, 16_000);
        assert_eq!(before.used(), 4_000);

        cluster.drain(&pool.id, 1, "2,3").await.unwrap();
        let after = cluster.space_usage(&pool.id).await.unwrap();
        assert_eq!(after.tiers[0].total, 1_400);
        assert_eq!(after.tiers[1].total, 14_000);
        assert_eq!(after.used(), 4_000);
    }

    #[tokio::test]
    async fn writes_beyond_capacity_fail() {
        let cluster = SimulatedCluster::new(SimulatedClusterConfig::default());
        let pool = cluster.create_pool(TierSizes::new(1_000, 0)).await.unwrap();
        cluster.write(&pool.id, 1_000).await.unwrap();
        let err = cluster.write(&pool.id, 1).await.unwrap_err();
        assert!(!err.is_fatal());
    }
}
