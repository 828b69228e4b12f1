use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use osa_cluster::SimulatedCluster;
use osa_common::error::{HarnessError, Result};
use osa_common::types::PoolHandle;
use tracing::debug;

use crate::driver::{BenchmarkStats, IoStarted, WorkloadDriver};
use crate::spec::WorkloadTask;

#[derive(Debug, Clone)]
pub struct SimulatedDriverConfig {
    /// Time spent "doing I/O" between the start signal and the write.
    pub io_time: Duration,
    /// Object classes whose runs fail after starting.
    pub failing_classes: HashSet<String>,
    /// Runs never finish once started.
    pub hang: bool,
}

impl Default for SimulatedDriverConfig {
    fn default() -> Self {
        Self {
            io_time: Duration::from_millis(200),
            failing_classes: HashSet::new(),
            hang: false,
        }
    }
}

/// Workload driver that writes block-sized chunks into a `SimulatedCluster`.
#[derive(Debug, Clone)]
pub struct SimulatedDriver {
    cluster: SimulatedCluster,
    config: SimulatedDriverConfig,
}

impl SimulatedDriver {
    pub fn new(cluster: SimulatedCluster, config: SimulatedDriverConfig) -> Self {
        Self { cluster, config }
    }
}

#[async_trait]
impl WorkloadDriver for SimulatedDriver {
    async fn run_benchmark(
        &self,
        pool: &PoolHandle,
        task: &WorkloadTask,
        started: &mut IoStarted,
    ) -> Result<BenchmarkStats> {
        let bytes = task.spec.sequence.block_bytes()?;
        started.notify();
        debug!(pool = %pool.id, spec = %task.spec, job = task.job, bytes, "simulated io started");

        if self.config.hang {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.config.io_time).await;

        if self.config.failing_classes.contains(&task.spec.obj_class) {
            return Err(HarnessError::Workload(format!(
                "injected failure for object class {}",
                task.spec.obj_class
            )));
        }

        self.cluster.write(&pool.id, bytes).await?;
        Ok(BenchmarkStats {
            bytes_written: bytes,
            max_write_mib_s: None,
            max_read_mib_s: None,
        })
    }
}
