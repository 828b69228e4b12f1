use std::path::Path;
use std::time::Duration;

use osa_common::error::{HarnessError, Result};
use osa_common::types::TierSizes;
use osa_workload::spec::{IorAxes, TestSequence};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SCM_SIZE: u64 = 6_000_000_000;
pub const DEFAULT_NVME_SIZE: u64 = 54_000_000_000;
pub const DEFAULT_TARGETS_PER_RANK: u32 = 8;
pub const DEFAULT_PARALLEL_JOBS: usize = 2;
pub const DEFAULT_MIN_POLLS: u32 = 3;
pub const DEFAULT_MAX_POLLS: u32 = 200;

pub const ENV_SERVER_HOSTS: &str = "OSA_SERVER_HOSTS";
pub const ENV_SEED: &str = "OSA_SEED";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IorSettings {
    pub obj_class: Vec<String>,
    pub api: Vec<String>,
    pub test_sequence: Vec<TestSequence>,
    pub flags: Vec<String>,
    pub no_parallel_job: usize,
}

impl Default for IorSettings {
    fn default() -> Self {
        let axes = IorAxes::default();
        Self {
            obj_class: axes.obj_class,
            api: axes.api,
            test_sequence: axes.test_sequence,
            flags: axes.flags,
            no_parallel_job: DEFAULT_PARALLEL_JOBS,
        }
    }
}

impl IorSettings {
    pub fn axes(&self) -> IorAxes {
        IorAxes {
            obj_class: self.obj_class.clone(),
            api: self.api.clone(),
            test_sequence: self.test_sequence.clone(),
            flags: self.flags.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub servers: Vec<String>,
    pub pool_counts: Vec<usize>,
    pub scm_size: u64,
    pub nvme_size: u64,
    pub ior: IorSettings,
    pub targets_per_rank: u32,
    pub launch_delay_ms: u64,
    pub ready_timeout_ms: u64,
    pub join_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub min_polls: u32,
    pub max_polls: u32,
    pub seed: Option<u64>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            pool_counts: vec![1, 2],
            scm_size: DEFAULT_SCM_SIZE,
            nvme_size: DEFAULT_NVME_SIZE,
            ior: IorSettings::default(),
            targets_per_rank: DEFAULT_TARGETS_PER_RANK,
            launch_delay_ms: 1_000,
            ready_timeout_ms: 30_000,
            join_timeout_ms: 20_000,
            poll_interval_ms: 3_000,
            min_polls: DEFAULT_MIN_POLLS,
            max_polls: DEFAULT_MAX_POLLS,
            seed: None,
        }
    }
}

impl ScenarioConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|err| {
            HarnessError::InvalidConfig(format!("failed to parse {}: {err}", path.display()))
        })
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay `OSA_SERVER_HOSTS` (comma separated) and `OSA_SEED` read through `lookup`.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(hosts) = lookup(ENV_SERVER_HOSTS) {
            let servers = parse_host_list(&hosts);
            if !servers.is_empty() {
                self.servers = servers;
            }
        }
        if let Some(seed) = lookup(ENV_SEED) {
            let seed = seed.trim().parse::<u64>().map_err(|_| {
                HarnessError::InvalidConfig(format!("{ENV_SEED} is not an integer: {seed:?}"))
            })?;
            self.seed = Some(seed);
        }
        Ok(())
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Highest rank a drain may pick; rank 0 is never drained.
    pub fn max_drain_rank(&self) -> u32 {
        (self.server_count() as u32)
            .saturating_mul(2)
            .saturating_sub(1)
    }

    pub fn total_tiers(&self) -> TierSizes {
        TierSizes::new(self.scm_size, self.nvme_size)
    }

    pub fn launch_delay(&self) -> Duration {
        Duration::from_millis(self.launch_delay_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(HarnessError::InvalidConfig(
                "at least one server host is required".to_string(),
            ));
        }
        if self.pool_counts.is_empty() || self.pool_counts.contains(&0) {
            return Err(HarnessError::InvalidConfig(
                "pool_counts must be non-empty and contain no zero".to_string(),
            ));
        }
        if self.targets_per_rank < 2 {
            return Err(HarnessError::InvalidConfig(format!(
                "targets_per_rank must be at least 2, got {}",
                self.targets_per_rank
            )));
        }
        if self.max_polls == 0 || self.min_polls > self.max_polls {
            return Err(HarnessError::InvalidConfig(format!(
                "poll budget invalid: min_polls={} max_polls={}",
                self.min_polls, self.max_polls
            )));
        }
        if self.ior.no_parallel_job == 0 {
            return Err(HarnessError::InvalidConfig(
                "no_parallel_job must be greater than zero".to_string(),
            ));
        }
        self.ior.axes().validate()?;

        let widest = self.pool_counts.iter().copied().max().unwrap_or(1);
        let share = self.total_tiers().split(widest)?;
        if share.scm == 0 {
            return Err(HarnessError::InvalidConfig(format!(
                "scm_size {} is too small to split across {widest} pools",
                self.scm_size
            )));
        }
        Ok(())
    }
}

pub fn parse_host_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}
