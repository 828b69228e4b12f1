use osa_common::error::{HarnessError, Result};
use tracing::info;

use crate::orchestrator::DrainOutcome;

/// The scenario's correctness gate: the rebuild succeeded and the pool
/// version strictly advanced across the drain.
pub fn verify(outcome: &DrainOutcome) -> Result<()> {
    if !outcome.success || outcome.pver_end <= outcome.pver_begin {
        return Err(HarnessError::Verification {
            pool: outcome.pool.to_string(),
            pver_begin: outcome.pver_begin,
            pver_end: outcome.pver_end,
            success: outcome.success,
        });
    }
    info!(
        pool = %outcome.pool,
        pver_begin = outcome.pver_begin,
        pver_end = outcome.pver_end,
        "pool version advanced after drain"
    );
    Ok(())
}
