use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use osa_common::error::HarnessError;
use osa_common::types::{PoolHandle, PoolId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::driver::{BenchmarkStats, IoStarted, WorkloadDriver};
use crate::spec::{WorkloadSpec, WorkloadTask};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadResult {
    pub pool: PoolId,
    pub spec: WorkloadSpec,
    pub job: usize,
    pub success: bool,
    pub diagnostic: String,
    pub stats: Option<BenchmarkStats>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Executes a single workload task and reports the outcome into the result queue.
#[derive(Clone)]
pub struct WorkloadRunner {
    driver: Arc<dyn WorkloadDriver>,
}

impl WorkloadRunner {
    pub fn new(driver: Arc<dyn WorkloadDriver>) -> Self {
        Self { driver }
    }

    /// Never fails: driver errors and panics become an unsuccessful `WorkloadResult`.
    pub async fn run(
        &self,
        pool: &PoolHandle,
        task: WorkloadTask,
        sink: &mpsc::UnboundedSender<WorkloadResult>,
        mut started: IoStarted,
    ) {
        let started_at = Utc::now();
        info!(pool = %pool.id, spec = %task.spec, job = task.job, "workload starting");

        let outcome = AssertUnwindSafe(self.driver.run_benchmark(pool, &task, &mut started))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(HarnessError::Workload(format!(
                    "driver panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });
        if !started.is_notified() {
            debug!(pool = %pool.id, spec = %task.spec, job = task.job, "workload ended before io started");
        }
        let (success, diagnostic, stats) = match outcome {
            Ok(stats) => (true, String::from("completed"), Some(stats)),
            Err(err) => {
                warn!(pool = %pool.id, spec = %task.spec, job = task.job, error = %err, "workload failed");
                (false, err.to_string(), None)
            }
        };

        let result = WorkloadResult {
            pool: pool.id.clone(),
            spec: task.spec,
            job: task.job,
            success,
            diagnostic,
            stats,
            started_at,
            finished_at: Utc::now(),
        };
        if sink.send(result).is_err() {
            warn!(pool = %pool.id, "result queue closed before workload finished");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSummary {
    pub passed: usize,
    pub failed: usize,
    pub failures: Vec<String>,
}

impl WorkloadSummary {
    pub fn from_results(results: &[WorkloadResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            if result.success {
                summary.passed += 1;
            } else {
                summary.failed += 1;
                summary.failures.push(format!(
                    "{} job {}: {}",
                    result.spec, result.job, result.diagnostic
                ));
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed
    }
}
