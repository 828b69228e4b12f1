use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use osa_common::types::{PoolHandle, PoolId};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::driver::{IoStarted, WorkloadDriver};
use crate::runner::{WorkloadResult, WorkloadRunner};
use crate::spec::{WorkloadSpec, WorkloadTask};

pub const DEFAULT_LAUNCH_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct FleetSettings {
    /// Pause after each spec's jobs are launched.
    pub launch_delay: Duration,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            launch_delay: DEFAULT_LAUNCH_DELAY,
        }
    }
}

/// Consumer side of the shared result queue.
#[derive(Debug)]
pub struct ResultQueue {
    receiver: mpsc::UnboundedReceiver<WorkloadResult>,
}

impl ResultQueue {
    /// Everything queued so far; results from detached jobs may still arrive later.
    pub fn drain(&mut self) -> Vec<WorkloadResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.receiver.try_recv() {
            results.push(result);
        }
        results
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub started: usize,
    pub ended_before_io: usize,
    pub pending: usize,
}

impl ReadinessReport {
    pub fn all_settled(&self) -> bool {
        self.pending == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinReport {
    pub completed: usize,
    pub panicked: usize,
    pub abandoned: usize,
}

/// Every job of every spec launched against one pool.
#[derive(Debug)]
pub struct Fleet {
    pool: PoolId,
    handles: Vec<JoinHandle<()>>,
    ready: Vec<oneshot::Receiver<()>>,
}

impl Fleet {
    pub fn pool(&self) -> &PoolId {
        &self.pool
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits until every job has signalled that its I/O is in flight, or ended, or `timeout` passes.
    pub async fn await_io_started(&mut self, timeout: Duration) -> ReadinessReport {
        let deadline = Instant::now() + timeout;
        let waits = self
            .ready
            .drain(..)
            .map(|receiver| tokio::time::timeout_at(deadline, receiver));

        let mut report = ReadinessReport::default();
        for outcome in join_all(waits).await {
            match outcome {
                Ok(Ok(())) => report.started += 1,
                Ok(Err(_)) => report.ended_before_io += 1,
                Err(_) => report.pending += 1,
            }
        }

        if report.all_settled() {
            info!(pool = %self.pool, started = report.started, ended = report.ended_before_io, "fleet io in flight");
        } else {
            warn!(
                pool = %self.pool,
                started = report.started,
                pending = report.pending,
                ?timeout,
                "readiness barrier timed out, continuing"
            );
        }
        report
    }

    pub async fn join(self, per_task_timeout: Duration) -> JoinReport {
        let pool = self.pool;
        let report = join_fleet(self.handles, per_task_timeout).await;
        info!(
            pool = %pool,
            completed = report.completed,
            panicked = report.panicked,
            abandoned = report.abandoned,
            "fleet joined"
        );
        report
    }
}

/// Joins all handles against one shared deadline so the call is bounded by
/// `per_task_timeout` regardless of fleet size. Unfinished tasks are detached.
pub async fn join_fleet(handles: Vec<JoinHandle<()>>, per_task_timeout: Duration) -> JoinReport {
    let deadline = Instant::now() + per_task_timeout;
    let waits = handles
        .into_iter()
        .map(|handle| tokio::time::timeout_at(deadline, handle));

    let mut report = JoinReport::default();
    for outcome in join_all(waits).await {
        match outcome {
            Ok(Ok(())) => report.completed += 1,
            Ok(Err(err)) => {
                warn!(error = %err, "workload task panicked");
                report.panicked += 1;
            }
            Err(_) => report.abandoned += 1,
        }
    }
    report
}

#[derive(Clone)]
pub struct FleetCoordinator {
    runner: WorkloadRunner,
    settings: FleetSettings,
    sink: mpsc::UnboundedSender<WorkloadResult>,
}

impl FleetCoordinator {
    pub fn new(driver: Arc<dyn WorkloadDriver>, settings: FleetSettings) -> (Self, ResultQueue) {
        let (sink, receiver) = mpsc::unbounded_channel();
        (
            Self {
                runner: WorkloadRunner::new(driver),
                settings,
                sink,
            },
            ResultQueue { receiver },
        )
    }

    pub async fn launch_fleet(
        &self,
        pool: &PoolHandle,
        specs: &[WorkloadSpec],
        jobs_per_spec: usize,
    ) -> Fleet {
        let mut handles = Vec::with_capacity(specs.len() * jobs_per_spec);
        let mut ready = Vec::with_capacity(specs.len() * jobs_per_spec);

        for spec in specs {
            for job in 0..jobs_per_spec {
                let task = WorkloadTask {
                    spec: spec.clone(),
                    job,
                };
                let (started, receiver) = IoStarted::channel();
                let runner = self.runner.clone();
                let sink = self.sink.clone();
                let pool = pool.clone();

                info!(pool = %pool.id, spec = %task.spec, job, "launching workload");
                handles.push(tokio::spawn(async move {
                    runner.run(&pool, task, &sink, started).await;
                }));
                ready.push(receiver);
            }

            if !self.settings.launch_delay.is_zero() {
                tokio::time::sleep(self.settings.launch_delay).await;
            }
        }

        Fleet {
            pool: pool.id.clone(),
            handles,
            ready,
        }
    }
}
