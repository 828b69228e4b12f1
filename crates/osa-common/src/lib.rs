pub mod error;
pub mod types;

pub use error::{HarnessError, Result};
pub use types::{
    CommandResult, DrainTarget, PoolHandle, PoolId, PoolState, RebuildStatus, SpaceReport,
    TierSizes, TierSpace,
};
