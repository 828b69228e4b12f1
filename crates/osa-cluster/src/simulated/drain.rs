use chrono::Utc;
use osa_common::error::Result;
use osa_common::types::{CommandResult, PoolId, RebuildStatus};
use tracing::{info, warn};

use crate::simulated::space;
use crate::simulated::{DrainRecord, SimulatedCluster};

const DER_INVAL: i32 = -1003;
const DER_NONEXIST: i32 = -1005;
const DER_NOSPACE: i32 = -1007;
const DER_ALREADY: i32 = -1016;

pub(crate) async fn start_drain(
    cluster: &SimulatedCluster,
    pool_id: &PoolId,
    rank: u32,
    targets: &str,
) -> Result<CommandResult> {
    let mut state = cluster.state.write().await;

    state.drains.push(DrainRecord {
        pool: pool_id.clone(),
        rank,
        targets: targets.to_string(),
        at: Utc::now(),
    });

    if let Some(reason) = state.faults.reject_drains.clone() {
        warn!(pool = %pool_id, rank, targets, %reason, "simulated drain rejected");
        return Ok(CommandResult::rejected(DER_INVAL, reason));
    }

    let config = cluster.config.clone();
    if rank >= config.ranks {
        return Ok(CommandResult::rejected(
            DER_INVAL,
            format!("rank {rank} not in system of {} ranks", config.ranks),
        ));
    }

    let indices = match parse_target_list(targets, config.targets_per_rank) {
        Ok(indices) => indices,
        Err(reason) => return Ok(CommandResult::rejected(DER_INVAL, reason)),
    };

    let script = state.faults.rebuild_script.clone();
    let freeze_version = state.faults.freeze_version;
    let Some(pool) = state.pools.get_mut(pool_id) else {
        return Ok(CommandResult::rejected(
            DER_NONEXIST,
            format!("pool not found: {pool_id}"),
        ));
    };

    if indices.iter().any(|idx| pool.drained.contains(&(rank, *idx))) {
        return Ok(CommandResult::rejected(
            DER_ALREADY,
            format!("targets {targets} on rank {rank} already drained"),
        ));
    }

    let remaining_targets = space::active_targets(&config, pool).saturating_sub(indices.len() as u64);
    let remaining = space::capacity_for(&config, &pool.handle.tiers, remaining_targets);
    if pool.used.scm > remaining.scm || pool.used.nvme > remaining.nvme {
        return Ok(CommandResult::rejected(
            DER_NOSPACE,
            format!(
                "insufficient pool capacity to drain rank {rank} targets {targets}: used scm={} nvme={}, remaining scm={} nvme={}",
                pool.used.scm, pool.used.nvme, remaining.scm, remaining.nvme
            ),
        ));
    }

    for idx in &indices {
        pool.drained.insert((rank, *idx));
    }
    if !freeze_version {
        pool.version = pool.version.saturating_add(1);
    }

    pool.pending_rebuild = match script {
        Some(script) => script.into_iter().collect(),
        None => std::iter::repeat_n(RebuildStatus::Busy, config.rebuild_busy_polls)
            .chain(std::iter::once(RebuildStatus::Done))
            .collect(),
    };

    info!(
        pool = %pool_id,
        rank,
        targets,
        version = pool.version,
        drained = pool.drained.len(),
        "simulated drain accepted"
    );
    Ok(CommandResult::ok(format!(
        "drain of rank {rank} targets {targets} on pool {pool_id} started"
    )))
}

fn parse_target_list(targets: &str, targets_per_rank: u32) -> std::result::Result<Vec<u32>, String> {
    let mut indices = Vec::new();
    for raw in targets.split(',').map(str::trim) {
        let idx = raw
            .parse::<u32>()
            .map_err(|_| format!("invalid target index: {raw:?}"))?;
        if idx >= targets_per_rank {
            return Err(format!(
                "target index {idx} outside 0..{targets_per_rank}"
            ));
        }
        if indices.contains(&idx) {
            return Err(format!("duplicate target index: {idx}"));
        }
        indices.push(idx);
    }
    Ok(indices)
}
