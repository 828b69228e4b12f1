pub mod driver;
pub mod fleet;
pub mod ior;
pub mod runner;
pub mod simulated;
pub mod spec;

pub use driver::{BenchmarkStats, IoStarted, WorkloadDriver};
pub use fleet::{Fleet, FleetCoordinator, FleetSettings, JoinReport, ReadinessReport, ResultQueue};
pub use ior::{IorConfig, IorDriver};
pub use runner::{WorkloadResult, WorkloadRunner, WorkloadSummary};
pub use simulated::{SimulatedDriver, SimulatedDriverConfig};
pub use spec::{IorAxes, TestSequence, WorkloadSpec, WorkloadTask};
