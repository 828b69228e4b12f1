use async_trait::async_trait;
use osa_common::error::Result;
use osa_common::types::{CommandResult, PoolHandle, PoolId, RebuildStatus, SpaceReport, TierSizes};

/// Narrow view of the cluster control plane used by the drain scenario.
///
/// Only the control thread talks to the control plane, one call at a time.
/// Workload tasks never see it.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn create_pool(&self, tiers: TierSizes) -> Result<PoolHandle>;

    async fn destroy_pool(&self, pool: &PoolId) -> Result<()>;

    /// A rejected drain is reported through `CommandResult`, not `Err`.
    async fn drain(&self, pool: &PoolId, rank: u32, targets: &str) -> Result<CommandResult>;

    async fn pool_version(&self, pool: &PoolId) -> Result<u64>;

    async fn rebuild_status(&self, pool: &PoolId) -> Result<RebuildStatus>;

    async fn space_usage(&self, pool: &PoolId) -> Result<SpaceReport>;
}
