use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolId(String);

impl PoolId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Byte budget for the two storage tiers of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TierSizes {
    pub scm: u64,
    pub nvme: u64,
}

impl TierSizes {
    pub fn new(scm: u64, nvme: u64) -> Self {
        Self { scm, nvme }
    }

    /// Even share of the budget for one of `pools` pools. The remainder is dropped.
    pub fn split(&self, pools: usize) -> Result<Self> {
        if pools == 0 {
            return Err(HarnessError::InvalidConfig(
                "cannot split tier sizes across zero pools".to_string(),
            ));
        }
        let divisor = pools as u64;
        Ok(Self {
            scm: self.scm / divisor,
            nvme: self.nvme / divisor,
        })
    }

    pub fn total(&self) -> u64 {
        self.scm.saturating_add(self.nvme)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Absent,
    Created,
    Draining,
    Stable,
    Destroyed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolHandle {
    pub id: PoolId,
    pub tiers: TierSizes,
}

/// Rank plus two contiguous target indices, fixed for one pool-count iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainTarget {
    pub rank: u32,
    pub targets: (u32, u32),
}

impl DrainTarget {
    pub fn new(rank: u32, first_target: u32) -> Self {
        Self {
            rank,
            targets: (first_target, first_target + 1),
        }
    }

    /// Target list in the `a,b` form the admin tool expects.
    pub fn target_csv(&self) -> String {
        format!("{},{}", self.targets.0, self.targets.1)
    }

    pub fn validate(&self, max_rank: u32, targets_per_rank: u32) -> Result<()> {
        if self.rank == 0 || self.rank > max_rank {
            return Err(HarnessError::InvalidConfig(format!(
                "drain rank {} outside [1, {max_rank}]",
                self.rank
            )));
        }
        let (first, second) = self.targets;
        if second != first + 1 || second >= targets_per_rank {
            return Err(HarnessError::InvalidConfig(format!(
                "drain targets {first},{second} are not a contiguous pair below {targets_per_rank}"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for DrainTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rank {} targets {}", self.rank, self.target_csv())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildStatus {
    Busy,
    Done,
    Failed,
}

impl RebuildStatus {
    /// Maps the rebuild `state` string and numeric `status` reported by a pool query.
    /// A rebuild that has not started yet (`idle`) counts as busy.
    pub fn from_query(state: &str, status: i32) -> Result<Self> {
        if status != 0 {
            return Ok(Self::Failed);
        }
        match state.trim().to_ascii_lowercase().as_str() {
            "busy" | "idle" | "in progress" => Ok(Self::Busy),
            "done" | "completed" | "success" => Ok(Self::Done),
            "failed" | "aborted" => Ok(Self::Failed),
            other => Err(HarnessError::CommandParse(format!(
                "unknown rebuild state: {other}"
            ))),
        }
    }
}

impl fmt::Display for RebuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Busy => "busy",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSpace {
    pub tier: String,
    pub total: u64,
    pub free: u64,
}

impl TierSpace {
    pub fn used(&self) -> u64 {
        self.total.saturating_sub(self.free)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceReport {
    pub pool: PoolId,
    pub tiers: Vec<TierSpace>,
}

impl SpaceReport {
    pub fn used(&self) -> u64 {
        self.tiers.iter().map(TierSpace::used).sum()
    }
}

/// Outcome of an admin command that may be rejected without being an I/O error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub status: i32,
    pub error: Option<String>,
    pub output: String,
}

impl CommandResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            status: 0,
            error: None,
            output: output.into(),
        }
    }

    pub fn rejected(status: i32, error: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(error.into()),
            output: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0 && self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::{DrainTarget, RebuildStatus, TierSizes};

    #[test]
    fn split_never_exceeds_budget() {
        let total = TierSizes::new(6_000_000_001, 54_000_000_007);
        for pools in 1..=7 {
            let share = total.split(pools).unwrap();
            assert!(share.scm * pools as u64 <= total.scm);
            assert!(share.nvme * pools as u64 <= total.nvme);
        }
        assert!(total.split(0).is_err());
    }

    #[test]
    fn drain_target_formats_and_validates() {
        let target = DrainTarget::new(2, 4);
        assert_eq!(target.targets, (4, 5));
        assert_eq!(target.target_csv(), "4,5");
        assert!(target.validate(3, 8).is_ok());
        assert!(target.validate(1, 8).is_err());
        assert!(DrainTarget::new(1, 7).validate(3, 8).is_err());
        assert!(DrainTarget::new(0, 0).validate(3, 8).is_err());
    }

    #[test]
    fn rebuild_status_from_query() {
        assert_eq!(RebuildStatus::from_query("idle", 0).unwrap(), RebuildStatus::Busy);
        assert_eq!(RebuildStatus::from_query("Done", 0).unwrap(), RebuildStatus::Done);
        assert_eq!(RebuildStatus::from_query("done", -1003).unwrap(), RebuildStatus::Failed);
        assert!(RebuildStatus::from_query("sideways", 0).is_err());
    }

    #[test]
    fn pool_state_serializes_snake_case() {
        let json = serde_json::to_string(&super::PoolState::Destroyed).unwrap();
        assert_eq!(json, "\"destroyed\"");
    }
}
