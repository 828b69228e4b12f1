use std::sync::Arc;

use osa_cluster::ControlPlane;
use osa_common::error::{HarnessError, Result};
use osa_common::types::{DrainTarget, PoolHandle, PoolId, PoolState, SpaceReport, TierSizes};
use osa_workload::{
    FleetCoordinator, FleetSettings, JoinReport, ReadinessReport, ResultQueue, WorkloadDriver,
    WorkloadResult, WorkloadSpec, WorkloadSummary,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::ScenarioConfig;
use crate::orchestrator::{DrainOrchestrator, DrainOutcome, DrainSettings, select_drain_target};
use crate::pools::PoolLifecycleManager;
use crate::verify::verify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    PoolsCreated,
    WorkloadsLaunched,
    Draining,
    Verified,
    FleetJoined,
    Reported,
    Done,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolReport {
    pub pool: PoolId,
    pub tiers: TierSizes,
    pub outcome: DrainOutcome,
    pub readiness: ReadinessReport,
    pub join: JoinReport,
    pub space_begin: SpaceReport,
    pub space_end: Option<SpaceReport>,
    pub workloads: WorkloadSummary,
    pub results: Vec<WorkloadResult>,
    pub final_state: PoolState,
}

#[derive(Debug, Clone, Serialize)]
pub struct IterationReport {
    pub pool_count: usize,
    pub seed: u64,
    pub target: DrainTarget,
    pub pools: Vec<PoolReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub seed: u64,
    pub iterations: Vec<IterationReport>,
}

impl ScenarioReport {
    pub fn workload_failures(&self) -> usize {
        self.iterations
            .iter()
            .flat_map(|iteration| &iteration.pools)
            .map(|pool| pool.workloads.failed)
            .sum()
    }
}

#[derive(Debug, Error)]
#[error("{reason}")]
pub struct ScenarioFailure {
    pub stage: Stage,
    pub pool_count: usize,
    pub seed: u64,
    pub pool: Option<PoolId>,
    pub target: Option<DrainTarget>,
    pub pver: Option<(u64, u64)>,
    reason: String,
    #[source]
    pub source: HarnessError,
}

/// Serializable form of a `ScenarioFailure` for CI output.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub failed_step: &'static str,
    pub stage: Stage,
    pub pool_count: usize,
    pub seed: u64,
    pub pool: Option<PoolId>,
    pub target: Option<DrainTarget>,
    pub pver: Option<(u64, u64)>,
    pub reason: String,
}

impl ScenarioFailure {
    pub fn failed_step(&self) -> &'static str {
        self.source.stage()
    }

    pub fn record(&self) -> FailureRecord {
        FailureRecord {
            failed_step: self.failed_step(),
            stage: self.stage,
            pool_count: self.pool_count,
            seed: self.seed,
            pool: self.pool.clone(),
            target: self.target,
            pver: self.pver,
            reason: self.reason.clone(),
        }
    }
}

/// Per-iteration state threaded through every stage.
struct ScenarioContext {
    pool_count: usize,
    seed: u64,
    stage: Stage,
    target: Option<DrainTarget>,
    current_pool: Option<PoolId>,
    pver: Option<(u64, u64)>,
    pools: PoolLifecycleManager,
    reports: Vec<PoolReport>,
    results: Vec<WorkloadResult>,
}

impl ScenarioContext {
    fn new(pool_count: usize, seed: u64, pools: PoolLifecycleManager) -> Self {
        Self {
            pool_count,
            seed,
            stage: Stage::Init,
            target: None,
            current_pool: None,
            pver: None,
            pools,
            reports: Vec::new(),
            results: Vec::new(),
        }
    }

    fn advance(&mut self, stage: Stage) {
        debug!(pool_count = self.pool_count, from = ?self.stage, to = ?stage, "scenario stage");
        self.stage = stage;
    }

    fn fail(&self, source: HarnessError) -> ScenarioFailure {
        let mut reason = format!(
            "{} failed during {:?}: {source} (pool_count={}, seed={}",
            source.stage(),
            self.stage,
            self.pool_count,
            self.seed
        );
        if let Some(pool) = &self.current_pool {
            reason.push_str(&format!(", pool={pool}"));
        }
        if let Some(target) = &self.target {
            reason.push_str(&format!(", rank={}, targets={}", target.rank, target.target_csv()));
        }
        if let Some((begin, end)) = self.pver {
            reason.push_str(&format!(", pver={begin}->{end}"));
        }
        reason.push(')');

        ScenarioFailure {
            stage: self.stage,
            pool_count: self.pool_count,
            seed: self.seed,
            pool: self.current_pool.clone(),
            target: self.target,
            pver: self.pver,
            reason,
            source,
        }
    }
}

/// Seed used for the pool-count iteration `pool_count` of a run seeded with `seed`.
pub fn iteration_seed(seed: u64, pool_count: usize) -> u64 {
    seed.wrapping_add(pool_count as u64)
}

/// Runs one drain cycle per pool for each configured pool count:
/// `Init → PoolsCreated → WorkloadsLaunched → Draining → Verified → FleetJoined → Reported`.
/// The first fatal error stops the run.
pub struct Scenario {
    config: ScenarioConfig,
    control: Arc<dyn ControlPlane>,
    coordinator: FleetCoordinator,
    results: ResultQueue,
    orchestrator: DrainOrchestrator,
    specs: Vec<WorkloadSpec>,
    seed: u64,
}

impl Scenario {
    pub fn new(
        config: ScenarioConfig,
        control: Arc<dyn ControlPlane>,
        driver: Arc<dyn WorkloadDriver>,
    ) -> Result<Self> {
        config.validate()?;
        let seed = config.seed.unwrap_or_else(rand::random);
        let (coordinator, results) = FleetCoordinator::new(
            driver,
            FleetSettings {
                launch_delay: config.launch_delay(),
            },
        );
        let orchestrator =
            DrainOrchestrator::new(Arc::clone(&control), DrainSettings::from_config(&config));
        let specs = config.ior.axes().expand();

        Ok(Self {
            config,
            control,
            coordinator,
            results,
            orchestrator,
            specs,
            seed,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub async fn run(&mut self) -> std::result::Result<ScenarioReport, ScenarioFailure> {
        info!(
            seed = self.seed,
            servers = self.config.server_count(),
            pool_counts = ?self.config.pool_counts,
            specs = self.specs.len(),
            jobs_per_spec = self.config.ior.no_parallel_job,
            "online drain scenario starting"
        );

        let mut iterations = Vec::with_capacity(self.config.pool_counts.len());
        for pool_count in self.config.pool_counts.clone() {
            iterations.push(self.run_iteration(pool_count).await?);
        }

        info!(seed = self.seed, stage = ?Stage::Done, "online drain scenario passed");
        Ok(ScenarioReport {
            seed: self.seed,
            iterations,
        })
    }

    async fn run_iteration(
        &mut self,
        pool_count: usize,
    ) -> std::result::Result<IterationReport, ScenarioFailure> {
        let seed = iteration_seed(self.seed, pool_count);
        let mut ctx = ScenarioContext::new(
            pool_count,
            seed,
            PoolLifecycleManager::new(Arc::clone(&self.control)),
        );

        match self.drive(&mut ctx).await {
            Ok(report) => Ok(report),
            Err(source) => {
                let failure = ctx.fail(source);
                error!(%failure, "online drain iteration failed");
                if let Err(err) = ctx.pools.destroy_all().await {
                    warn!(error = %err, "teardown after failure left pools behind");
                }
                Err(failure)
            }
        }
    }

    async fn drive(&mut self, ctx: &mut ScenarioContext) -> Result<IterationReport> {
        let mut rng = StdRng::seed_from_u64(ctx.seed);
        let target = select_drain_target(
            &mut rng,
            self.config.server_count(),
            self.config.targets_per_rank,
        )?;
        target.validate(self.config.max_drain_rank(), self.config.targets_per_rank)?;
        ctx.target = Some(target);
        info!(
            pool_count = ctx.pool_count,
            seed = ctx.seed,
            rank = target.rank,
            targets = %target.target_csv(),
            "drain target selected"
        );

        let handles = ctx
            .pools
            .create_pools(ctx.pool_count, self.config.total_tiers())
            .await?;
        ctx.advance(Stage::PoolsCreated);

        for (index, pool) in handles.iter().enumerate() {
            let report = self.drain_pool(ctx, index, pool, target).await?;
            ctx.reports.push(report);
        }
        ctx.current_pool = None;
        ctx.pver = None;

        for (index, pool) in handles.iter().enumerate() {
            let label = format!("Pool{index} space at the End");
            let space = ctx.pools.report_space(&pool.id, &label).await?;
            ctx.reports[index].space_end = Some(space);
        }

        self.collect_results(ctx);
        for report in ctx.reports.iter_mut() {
            let results: Vec<WorkloadResult> = ctx
                .results
                .iter()
                .filter(|result| result.pool == report.pool)
                .cloned()
                .collect();
            report.workloads = WorkloadSummary::from_results(&results);
            if report.workloads.failed > 0 {
                warn!(
                    pool = %report.pool,
                    failed = report.workloads.failed,
                    passed = report.workloads.passed,
                    "workload failures recorded"
                );
            }
            report.results = results;
        }

        ctx.pools.destroy_all().await?;
        for report in ctx.reports.iter_mut() {
            report.final_state = ctx.pools.state(&report.pool);
        }
        ctx.advance(Stage::Reported);

        Ok(IterationReport {
            pool_count: ctx.pool_count,
            seed: ctx.seed,
            target,
            pools: std::mem::take(&mut ctx.reports),
        })
    }

    async fn drain_pool(
        &mut self,
        ctx: &mut ScenarioContext,
        index: usize,
        pool: &PoolHandle,
        target: DrainTarget,
    ) -> Result<PoolReport> {
        ctx.current_pool = Some(pool.id.clone());
        ctx.pver = None;

        let label = format!("Pool{index} space: Beginning");
        let space_begin = ctx.pools.report_space(&pool.id, &label).await?;

        let mut fleet = self
            .coordinator
            .launch_fleet(pool, &self.specs, self.config.ior.no_parallel_job)
            .await;
        let readiness = fleet.await_io_started(self.config.ready_timeout()).await;
        ctx.advance(Stage::WorkloadsLaunched);

        ctx.pools.set_state(&pool.id, PoolState::Draining)?;
        ctx.advance(Stage::Draining);
        let checked = match self.orchestrator.drain_and_wait(pool, target).await {
            Ok(outcome) => {
                ctx.pver = Some((outcome.pver_begin, outcome.pver_end));
                verify(&outcome).map(|()| outcome)
            }
            Err(err) => Err(err),
        };
        let outcome = match checked {
            Ok(outcome) => outcome,
            Err(err) => {
                fleet.join(self.config.join_timeout()).await;
                return Err(err);
            }
        };
        ctx.pools.set_state(&pool.id, PoolState::Stable)?;
        ctx.advance(Stage::Verified);

        let join = fleet.join(self.config.join_timeout()).await;
        ctx.advance(Stage::FleetJoined);
        self.collect_results(ctx);

        Ok(PoolReport {
            pool: pool.id.clone(),
            tiers: pool.tiers,
            outcome,
            readiness,
            join,
            space_begin,
            space_end: None,
            workloads: WorkloadSummary::default(),
            results: Vec::new(),
            final_state: PoolState::Stable,
        })
    }

    /// Moves queued results for this iteration's pools into the context.
    fn collect_results(&mut self, ctx: &mut ScenarioContext) {
        let pools: Vec<PoolId> = ctx
            .pools
            .handles()
            .into_iter()
            .map(|handle| handle.id)
            .collect();
        for result in self.results.drain() {
            if pools.contains(&result.pool) {
                ctx.results.push(result);
            } else {
                debug!(pool = %result.pool, spec = %result.spec, "late result from an earlier iteration");
            }
        }
    }
}
