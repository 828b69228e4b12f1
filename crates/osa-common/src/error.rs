use thiserror::Error;

use crate::types::RebuildStatus;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("pool creation failed: {0}")]
    PoolCreation(String),
    #[error("drain rejected for pool {pool} rank {rank} targets {targets}: {reason}")]
    DrainInvocation {
        pool: String,
        rank: u32,
        targets: String,
        reason: String,
    },
    #[error("rebuild of pool {pool} did not complete after {polls} polls, last status {last_status}")]
    DrainFailed {
        pool: String,
        polls: u32,
        last_status: RebuildStatus,
    },
    #[error(
        "pool version check failed for pool {pool}: begin={pver_begin}, end={pver_end}, rebuild_ok={success}"
    )]
    Verification {
        pool: String,
        pver_begin: u64,
        pver_end: u64,
        success: bool,
    },
    #[error("workload failed: {0}")]
    Workload(String),
    #[error("control plane error: {0}")]
    ControlPlane(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("unparseable command output: {0}")]
    CommandParse(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::PoolCreation(_) => "creation",
            Self::DrainInvocation { .. } | Self::DrainFailed { .. } => "drain",
            Self::Verification { .. } => "verification",
            Self::Workload(_) => "workload",
            Self::ControlPlane(_) | Self::CommandParse(_) => "control-plane",
            Self::InvalidConfig(_) => "config",
            Self::Io(_) => "io",
        }
    }

    /// Workload failures are recorded per task and never unwind the scenario.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Workload(_))
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::HarnessError;
    use crate::types::RebuildStatus;

    #[test]
    fn stages_name_the_failing_step() {
        let err = HarnessError::DrainFailed {
            pool: "p0".to_string(),
            polls: 3,
            last_status: RebuildStatus::Busy,
        };
        assert_eq!(err.stage(), "drain");
        assert_eq!(
            err.to_string(),
            "rebuild of pool p0 did not complete after 3 polls, last status busy"
        );
        assert_eq!(HarnessError::PoolCreation("no space".into()).stage(), "creation");
    }

    #[test]
    fn only_workload_errors_are_non_fatal() {
        assert!(!HarnessError::Workload("ior exited 1".into()).is_fatal());
        assert!(HarnessError::ControlPlane("timeout".into()).is_fatal());
        assert!(
            HarnessError::Verification {
                pool: "p0".into(),
                pver_begin: 2,
                pver_end: 2,
                success: true,
            }
            .is_fatal()
        );
    }
}
