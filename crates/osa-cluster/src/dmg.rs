use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use osa_common::error::{HarnessError, Result};
use osa_common::types::{
    CommandResult, PoolHandle, PoolId, RebuildStatus, SpaceReport, TierSizes, TierSpace,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::process::Command;
use tracing::debug;

use crate::client::ControlPlane;

pub const DEFAULT_DMG_BINARY: &str = "dmg";
pub const DEFAULT_DMG_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct DmgConfig {
    pub binary: PathBuf,
    pub config_path: Option<PathBuf>,
    pub timeout: Duration,
}

impl Default for DmgConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_DMG_BINARY),
            config_path: None,
            timeout: DEFAULT_DMG_TIMEOUT,
        }
    }
}

/// Control plane backed by the `dmg` admin tool in JSON mode.
#[derive(Debug, Clone)]
pub struct DmgClient {
    config: DmgConfig,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    status: i32,
    #[serde(default)]
    error: Option<String>,
    response: Option<T>,
}

#[derive(Debug, Deserialize)]
struct PoolCreateResponse {
    uuid: String,
}

#[derive(Debug, Deserialize)]
struct RebuildInfo {
    #[serde(default)]
    status: i32,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct TierStats {
    #[serde(default)]
    media_type: Option<String>,
    total: u64,
    free: u64,
}

#[derive(Debug, Deserialize)]
struct PoolQueryResponse {
    #[serde(default)]
    version: u64,
    rebuild: Option<RebuildInfo>,
    #[serde(default)]
    tier_stats: Vec<TierStats>,
}

impl DmgClient {
    pub fn new(config: DmgConfig) -> Self {
        Self { config }
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        let mut command = Command::new(&self.config.binary);
        command.arg("-j");
        if let Some(path) = &self.config.config_path {
            command.arg("-o").arg(path);
        }
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(binary = %self.config.binary.display(), ?args, "running dmg");
        let output = tokio::time::timeout(self.config.timeout, command.output())
            .await
            .map_err(|_| {
                HarnessError::ControlPlane(format!(
                    "dmg {} timed out after {:?}",
                    args.join(" "),
                    self.config.timeout
                ))
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.trim().is_empty() {
            return Err(HarnessError::ControlPlane(format!(
                "dmg {} produced no output: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(stdout)
    }

    async fn query<T: DeserializeOwned>(&self, args: &[String]) -> Result<T> {
        let stdout = self.run(args).await?;
        let envelope: Envelope<T> = parse_envelope(&stdout)?;
        if envelope.status != 0 || envelope.error.is_some() {
            return Err(HarnessError::ControlPlane(format!(
                "dmg {} failed with status {}: {}",
                args.join(" "),
                envelope.status,
                envelope.error.unwrap_or_default()
            )));
        }
        envelope.response.ok_or_else(|| {
            HarnessError::CommandParse(format!("dmg {} returned no response", args.join(" ")))
        })
    }

    async fn pool_query(&self, pool: &PoolId) -> Result<PoolQueryResponse> {
        self.query(&["pool".into(), "query".into(), pool.to_string()])
            .await
    }
}

fn parse_envelope<T: DeserializeOwned>(stdout: &str) -> Result<Envelope<T>> {
    serde_json::from_str(stdout)
        .map_err(|err| HarnessError::CommandParse(format!("dmg json output: {err}")))
}

fn space_report(pool: &PoolId, stats: Vec<TierStats>) -> SpaceReport {
    let tiers = stats
        .into_iter()
        .enumerate()
        .map(|(idx, stat)| TierSpace {
            tier: stat
                .media_type
                .unwrap_or_else(|| (if idx == 0 { "scm" } else { "nvme" }).to_string()),
            total: stat.total,
            free: stat.free,
        })
        .collect();
    SpaceReport {
        pool: pool.clone(),
        tiers,
    }
}

#[async_trait]
impl ControlPlane for DmgClient {
    async fn create_pool(&self, tiers: TierSizes) -> Result<PoolHandle> {
        let args = vec![
            "pool".to_string(),
            "create".to_string(),
            format!("--scm-size={}", tiers.scm),
            format!("--nvme-size={}", tiers.nvme),
        ];
        let response: PoolCreateResponse = self
            .query(&args)
            .await
            .map_err(|err| HarnessError::PoolCreation(err.to_string()))?;
        Ok(PoolHandle {
            id: PoolId::new(response.uuid),
            tiers,
        })
    }

    async fn destroy_pool(&self, pool: &PoolId) -> Result<()> {
        let args = vec![
            "pool".to_string(),
            "destroy".to_string(),
            pool.to_string(),
            "--force".to_string(),
        ];
        let stdout = self.run(&args).await?;
        let envelope: Envelope<serde_json::Value> = parse_envelope(&stdout)?;
        if envelope.status != 0 {
            return Err(HarnessError::ControlPlane(format!(
                "pool destroy {pool} failed with status {}: {}",
                envelope.status,
                envelope.error.unwrap_or_default()
            )));
        }
        Ok(())
    }

    async fn drain(&self, pool: &PoolId, rank: u32, targets: &str) -> Result<CommandResult> {
        let args = vec![
            "pool".to_string(),
            "drain".to_string(),
            pool.to_string(),
            format!("--rank={rank}"),
            format!("--target-idx={targets}"),
        ];
        let stdout = self.run(&args).await?;
        let envelope: Envelope<serde_json::Value> = parse_envelope(&stdout)?;
        Ok(CommandResult {
            status: envelope.status,
            error: envelope.error,
            output: stdout,
        })
    }

    async fn pool_version(&self, pool: &PoolId) -> Result<u64> {
        Ok(self.pool_query(pool).await?.version)
    }

    async fn rebuild_status(&self, pool: &PoolId) -> Result<RebuildStatus> {
        let rebuild = self.pool_query(pool).await?.rebuild.ok_or_else(|| {
            HarnessError::CommandParse(format!("pool query {pool} has no rebuild section"))
        })?;
        RebuildStatus::from_query(&rebuild.state, rebuild.status)
    }

    async fn space_usage(&self, pool: &PoolId) -> Result<SpaceReport> {
        let query = self.pool_query(pool).await?;
        Ok(space_report(pool, query.tier_stats))
    }
}

#[cfg(test)]
mod tests {
    use osa_common::types::{PoolId, RebuildStatus};

    use super::{Envelope, PoolQueryResponse, parse_envelope, space_report};

    const QUERY_OUTPUT: &str = r#"{
      "response": {
        "uuid": "0b7b4d5c-2f0e-4f5e-9c56-0e1b0a3c55aa",
        "version": 7,
        "rebuild": { "status": 0, "state": "busy", "objects": 12, "records": 480 },
        "tier_stats": [
          { "media_type": "scm", "total": 3000000000, "free": 2500000000 },
          { "media_type": "nvme", "total": 27000000000, "free": 20000000000 }
        ]
      },
      "error": null,
      "status": 0
    }"#;

    #[test]
    fn parses_pool_query() {
        let envelope: Envelope<PoolQueryResponse> = parse_envelope(QUERY_OUTPUT).unwrap();
        let response = envelope.response.unwrap();
        assert_eq!(response.version, 7);
        let rebuild = response.rebuild.unwrap();
        assert_eq!(
            RebuildStatus::from_query(&rebuild.state, rebuild.status).unwrap(),
            RebuildStatus::Busy
        );

        let report = space_report(&PoolId::new("p"), response.tier_stats);
        assert_eq!(report.tiers.len(), 2);
        assert_eq!(report.tiers[1].tier, "nvme");
        assert_eq!(report.used(), 500_000_000 + 7_000_000_000);
    }

    #[test]
    fn rejected_envelope_keeps_status() {
        let stdout = r#"{"response": null, "error": "DER_NONEXIST(-1005)", "status": -1005}"#;
        let envelope: Envelope<serde_json::Value> = parse_envelope(stdout).unwrap();
        assert_eq!(envelope.status, -1005);
        assert_eq!(envelope.error.as_deref(), Some("DER_NONEXIST(-1005)"));
    }

    #[test]
    fn garbage_output_is_a_parse_error() {
        let err = parse_envelope::<serde_json::Value>("ERROR: dmg not connected").unwrap_err();
        assert_eq!(err.stage(), "control-plane");
    }
}
