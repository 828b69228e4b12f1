pub mod config;
pub mod orchestrator;
pub mod pools;
pub mod scenario;
pub mod verify;

pub use config::{IorSettings, ScenarioConfig};
pub use orchestrator::{DrainOrchestrator, DrainOutcome, DrainSettings, select_drain_target};
pub use pools::PoolLifecycleManager;
pub use scenario::{
    FailureRecord, IterationReport, PoolReport, Scenario, ScenarioFailure, ScenarioReport, Stage,
    iteration_seed,
};
pub use verify::verify;
