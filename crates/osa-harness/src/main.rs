use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use osa_cluster::{ControlPlane, DmgClient, DmgConfig, SimulatedCluster, SimulatedClusterConfig};
use osa_drain::{Scenario, ScenarioConfig};
use osa_workload::{IorConfig, IorDriver, SimulatedDriver, SimulatedDriverConfig, WorkloadDriver};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(
    name = "osa-online-drain",
    about = "Drain ranks out of live pools while IOR keeps writing"
)]
struct Cli {
    /// JSON scenario config; unset fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma separated server hosts.
    #[arg(long, value_delimiter = ',')]
    servers: Vec<String>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_delimiter = ',')]
    pool_counts: Vec<usize>,

    /// Run against an in-process cluster and workload driver.
    #[arg(long, default_value_t = false)]
    simulate: bool,

    #[arg(long, default_value = "dmg")]
    dmg: PathBuf,

    #[arg(long)]
    dmg_config: Option<PathBuf>,

    #[arg(long, default_value = "ior")]
    ior: PathBuf,

    #[arg(long)]
    mpirun: Option<PathBuf>,

    #[arg(long, default_value_t = 1)]
    processes: u32,

    #[arg(long, default_value = "/tmp/daos_dfuse")]
    mount_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Also write the JSON report (or failure record) here.
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Cli {
    fn scenario_config(&self) -> anyhow::Result<ScenarioConfig> {
        let mut config = match &self.config {
            Some(path) => ScenarioConfig::from_file(path)?,
            None => ScenarioConfig::default(),
        };
        config.apply_env()?;

        if !self.servers.is_empty() {
            config.servers = self.servers.clone();
        }
        if !self.pool_counts.is_empty() {
            config.pool_counts = self.pool_counts.clone();
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        Ok(config)
    }

    fn backends(
        &self,
        config: &ScenarioConfig,
    ) -> (Arc<dyn ControlPlane>, Arc<dyn WorkloadDriver>) {
        if self.simulate {
            let cluster = SimulatedCluster::new(SimulatedClusterConfig {
                targets_per_rank: config.targets_per_rank,
                ..SimulatedClusterConfig::for_servers(config.server_count())
            });
            let driver = SimulatedDriver::new(cluster.clone(), SimulatedDriverConfig::default());
            info!(ranks = cluster.config().ranks, "using simulated cluster");
            return (Arc::new(cluster), Arc::new(driver));
        }

        let dmg = DmgClient::new(DmgConfig {
            binary: self.dmg.clone(),
            config_path: self.dmg_config.clone(),
            ..DmgConfig::default()
        });
        let launcher_args = match &self.mpirun {
            Some(_) => vec!["-np".to_string(), self.processes.to_string()],
            None => Vec::new(),
        };
        let ior = IorDriver::new(IorConfig {
            binary: self.ior.clone(),
            launcher: self.mpirun.clone(),
            launcher_args,
            mount_dir: self.mount_dir.clone(),
        });
        (Arc::new(dmg), Arc::new(ior))
    }
}

async fn write_report(path: Option<&Path>, json: &str) -> anyhow::Result<()> {
    if let Some(path) = path {
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }
    Ok(())
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let env_filter = EnvFilter::from_default_env().add_directive("osa=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let config = cli.scenario_config()?;
    let (control, driver) = cli.backends(&config);
    let mut scenario = Scenario::new(config, control, driver)?;

    match scenario.run().await {
        Ok(report) => {
            let failures = report.workload_failures();
            if failures > 0 {
                warn!(failures, "workloads failed during the run");
            }
            let json = serde_json::to_string_pretty(&report)?;
            println!("{json}");
            write_report(cli.report.as_deref(), &json).await?;
            Ok(())
        }
        Err(failure) => {
            error!(
                step = failure.failed_step(),
                seed = failure.seed,
                pool_count = failure.pool_count,
                "online drain failed"
            );
            let json = serde_json::to_string_pretty(&failure.record())?;
            println!("{json}");
            write_report(cli.report.as_deref(), &json).await?;
            Err(failure.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, LogFormat};

    #[test]
    fn cli_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "osa-online-drain",
            "--servers",
            "wolf-1,wolf-2,wolf-3",
            "--pool-counts",
            "2",
            "--seed",
            "11",
            "--simulate",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert!(cli.simulate);
        assert_eq!(cli.log_format, LogFormat::Json);

        let config = cli.scenario_config().unwrap();
        assert_eq!(config.servers, vec!["wolf-1", "wolf-2", "wolf-3"]);
        assert_eq!(config.pool_counts, vec![2]);
        assert_eq!(config.seed, Some(11));
        assert_eq!(config.max_drain_rank(), 5);
    }

    #[test]
    fn simulated_backends_cover_every_rank() {
        let cli = Cli::try_parse_from(["osa-online-drain", "--servers", "a,b", "--simulate"]).unwrap();
        let config = cli.scenario_config().unwrap();
        assert!(config.validate().is_ok());
        let _ = cli.backends(&config);
    }
}
