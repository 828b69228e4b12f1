use async_trait::async_trait;
use osa_common::error::Result;
use osa_common::types::PoolHandle;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::spec::WorkloadTask;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkStats {
    pub bytes_written: u64,
    pub max_write_mib_s: Option<f64>,
    pub max_read_mib_s: Option<f64>,
}

/// One-shot "I/O started" signal handed to a driver.
///
/// Dropping it without calling `notify` tells the fleet the task ended
/// before any I/O was issued.
#[derive(Debug)]
pub struct IoStarted {
    sender: Option<oneshot::Sender<()>>,
}

impl IoStarted {
    pub fn channel() -> (Self, oneshot::Receiver<()>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn notify(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(());
        }
    }

    pub fn is_notified(&self) -> bool {
        self.sender.is_none()
    }
}

/// Runs one benchmark instance against a pool.
#[async_trait]
pub trait WorkloadDriver: Send + Sync + 'static {
    /// Implementations call `started.notify()` once I/O is in flight.
    async fn run_benchmark(
        &self,
        pool: &PoolHandle,
        task: &WorkloadTask,
        started: &mut IoStarted,
    ) -> Result<BenchmarkStats>;
}
