use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use osa_common::error::{HarnessError, Result};
use osa_common::types::PoolHandle;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use crate::driver::{BenchmarkStats, IoStarted, WorkloadDriver};
use crate::spec::WorkloadTask;

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct IorConfig {
    pub binary: PathBuf,
    /// Optional MPI launcher (`mpirun`) and its arguments, placed before the benchmark binary.
    pub launcher: Option<PathBuf>,
    pub launcher_args: Vec<String>,
    /// Mount point used for the non-DFS apis.
    pub mount_dir: PathBuf,
}

impl Default for IorConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ior"),
            launcher: None,
            launcher_args: Vec::new(),
            mount_dir: PathBuf::from("/tmp/daos_dfuse"),
        }
    }
}

/// Workload driver that shells out to the IOR benchmark.
#[derive(Debug, Clone)]
pub struct IorDriver {
    config: IorConfig,
}

impl IorDriver {
    pub fn new(config: IorConfig) -> Self {
        Self { config }
    }

    fn command(&self, pool: &PoolHandle, task: &WorkloadTask) -> Command {
        let mut command = match &self.config.launcher {
            Some(launcher) => {
                let mut command = Command::new(launcher);
                command.args(&self.config.launcher_args).arg(&self.config.binary);
                command
            }
            None => Command::new(&self.config.binary),
        };
        command.args(ior_args(&self.config, pool, task));
        command
    }
}

pub(crate) fn ior_args(config: &IorConfig, pool: &PoolHandle, task: &WorkloadTask) -> Vec<String> {
    let spec = &task.spec;
    let file_name = format!(
        "testfile_{}_{}_{}_{}",
        spec.obj_class, spec.api, spec.sequence_id, task.job
    );

    let mut args = vec![
        "-a".to_string(),
        spec.api.clone(),
        "-b".to_string(),
        spec.sequence.block_size.clone(),
        "-t".to_string(),
        spec.sequence.transfer_size.clone(),
    ];
    args.extend(spec.flags.split_whitespace().map(str::to_string));

    if spec.api.eq_ignore_ascii_case("DFS") {
        args.extend([
            "-o".to_string(),
            format!("/{file_name}"),
            "--dfs.pool".to_string(),
            pool.id.to_string(),
            "--dfs.cont".to_string(),
            Uuid::new_v4().to_string(),
            "--dfs.oclass".to_string(),
            spec.obj_class.clone(),
        ]);
    } else {
        args.extend([
            "-o".to_string(),
            config.mount_dir.join(file_name).display().to_string(),
        ]);
    }
    args
}

/// Pulls `Max Write:` / `Max Read:` bandwidth out of an IOR summary.
pub(crate) fn parse_summary(stdout: &str) -> BenchmarkStats {
    let mut stats = BenchmarkStats::default();
    for line in stdout.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("Max Write:") {
            stats.max_write_mib_s = leading_number(rest);
        } else if let Some(rest) = line.strip_prefix("Max Read:") {
            stats.max_read_mib_s = leading_number(rest);
        } else if let Some(rest) = line.strip_prefix("aggregate filesize") {
            let value: String = rest
                .trim_start_matches([' ', ':', '='])
                .split_whitespace()
                .take(2)
                .collect();
            stats.bytes_written = crate::spec::parse_size(&value).unwrap_or(0);
        }
    }
    stats
}

fn leading_number(text: &str) -> Option<f64> {
    text.split_whitespace().next()?.parse().ok()
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[async_trait]
impl WorkloadDriver for IorDriver {
    async fn run_benchmark(
        &self,
        pool: &PoolHandle,
        task: &WorkloadTask,
        started: &mut IoStarted,
    ) -> Result<BenchmarkStats> {
        let mut command = self.command(pool, task);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(pool = %pool.id, spec = %task.spec, job = task.job, ?command, "spawning ior");
        let child = command.spawn().map_err(|err| {
            HarnessError::Workload(format!(
                "failed to spawn {}: {err}",
                self.config.binary.display()
            ))
        })?;
        started.notify();

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            return Err(HarnessError::Workload(format!(
                "ior exited with {}: {}",
                output.status,
                tail(&String::from_utf8_lossy(&output.stderr), STDERR_TAIL_LINES)
            )));
        }

        let stats = parse_summary(&stdout);
        info!(
            pool = %pool.id,
            spec = %task.spec,
            job = task.job,
            max_write = ?stats.max_write_mib_s,
            max_read = ?stats.max_read_mib_s,
            "ior finished"
        );
        Ok(stats)
    }
}
