use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use osa_cluster::{SimulatedCluster, SimulatedClusterConfig};
use osa_common::error::HarnessError;
use osa_common::types::{PoolState, RebuildStatus};
use osa_drain::{IorSettings, Scenario, ScenarioConfig, Stage};
use osa_workload::{SimulatedDriver, SimulatedDriverConfig, TestSequence};

fn config(pool_counts: Vec<usize>) -> ScenarioConfig {
    ScenarioConfig {
        servers: vec!["server-a".into(), "server-b".into()],
        pool_counts,
        ior: IorSettings {
            obj_class: vec!["RP_2G1".into(), "SX".into()],
            api: vec!["DFS".into()],
            test_sequence: vec![TestSequence::new("1K", "4K")],
            flags: vec!["-w -r".into()],
            no_parallel_job: 2,
        },
        launch_delay_ms: 1,
        ready_timeout_ms: 2_000,
        join_timeout_ms: 2_000,
        poll_interval_ms: 1,
        min_polls: 3,
        max_polls: 20,
        seed: Some(7),
        ..ScenarioConfig::default()
    }
}

fn driver_config() -> SimulatedDriverConfig {
    SimulatedDriverConfig {
        io_time: Duration::from_millis(5),
        ..SimulatedDriverConfig::default()
    }
}

fn scenario(
    config: ScenarioConfig,
    driver: SimulatedDriverConfig,
) -> (SimulatedCluster, Scenario) {
    let cluster = SimulatedCluster::new(SimulatedClusterConfig::for_servers(config.servers.len()));
    let workload = Arc::new(SimulatedDriver::new(cluster.clone(), driver));
    let scenario = Scenario::new(config, Arc::new(cluster.clone()), workload).unwrap();
    (cluster, scenario)
}

#[tokio::test]
async fn drains_one_then_two_pools_under_load() {
    let (cluster, mut scenario) = scenario(config(vec![1, 2]), driver_config());

    let report = scenario.run().await.unwrap();
    assert_eq!(report.seed, 7);
    assert_eq!(report.iterations.len(), 2);
    assert_eq!(
        report.iterations.iter().map(|it| it.pool_count).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert_eq!(
        report.iterations.iter().map(|it| it.seed).collect::<Vec<_>>(),
        vec![8, 9]
    );

    let log = cluster.drain_log().await;
    assert_eq!(log.len(), 3);

    for iteration in &report.iterations {
        assert!((1..=3).contains(&iteration.target.rank));
        assert_eq!(iteration.pools.len(), iteration.pool_count);
        for pool in &iteration.pools {
            assert!(pool.outcome.pver_end > pool.outcome.pver_begin);
            assert!(pool.outcome.polls >= 3);
            assert_eq!(pool.readiness.started, 4);
            assert_eq!(pool.join.completed, 4);
            assert_eq!(pool.workloads.passed, 4);
            assert_eq!(pool.final_state, PoolState::Destroyed);
            assert!(pool.space_end.as_ref().unwrap().used() > 0);

            let drained = log.iter().find(|record| record.pool == pool.pool).unwrap();
            assert_eq!(drained.rank, iteration.target.rank);
            assert_eq!(drained.targets, iteration.target.target_csv());
        }
    }

    assert_eq!(report.workload_failures(), 0);
    assert!(cluster.pool_ids().await.is_empty());
}

#[tokio::test]
async fn drain_lands_while_workloads_are_writing() {
    let driver = SimulatedDriverConfig {
        io_time: Duration::from_millis(300),
        ..SimulatedDriverConfig::default()
    };
    let (cluster, mut scenario) = scenario(config(vec![1, 2]), driver);

    let report = scenario.run().await.unwrap();
    let log = cluster.drain_log().await;
    assert_eq!(log.len(), 3);

    for record in &log {
        let pool = report
            .iterations
            .iter()
            .flat_map(|iteration| &iteration.pools)
            .find(|pool| pool.pool == record.pool)
            .unwrap();
        assert_eq!(pool.results.len(), 4);
        let overlapping = pool
            .results
            .iter()
            .filter(|result| result.started_at <= record.at && record.at <= result.finished_at)
            .count();
        assert!(
            overlapping > 0,
            "drain of {} at {} overlapped no workload",
            record.pool,
            record.at
        );
    }
}

#[tokio::test]
async fn same_seed_picks_same_targets() {
    let (_, mut first) = scenario(config(vec![1, 2]), driver_config());
    let (_, mut second) = scenario(config(vec![1, 2]), driver_config());

    let first = first.run().await.unwrap();
    let second = second.run().await.unwrap();
    let targets = |report: &osa_drain::ScenarioReport| {
        report.iterations.iter().map(|it| it.target).collect::<Vec<_>>()
    };
    assert_eq!(targets(&first), targets(&second));
}

#[tokio::test]
async fn rebuild_that_never_finishes_fails_and_tears_down() {
    let mut config = config(vec![1, 2]);
    config.max_polls = 4;
    let (cluster, mut scenario) = scenario(config, driver_config());
    cluster.script_rebuild(vec![RebuildStatus::Busy]).await;

    let failure = scenario.run().await.unwrap_err();
    assert_eq!(failure.failed_step(), "drain");
    assert_eq!(failure.stage, Stage::Draining);
    assert_eq!(failure.pool_count, 1);
    assert_eq!(failure.seed, 8);
    assert!(failure.pool.is_some());
    assert!(failure.target.is_some());
    assert!(matches!(
        failure.source,
        HarnessError::DrainFailed { polls: 4, .. }
    ));
    assert!(failure.to_string().contains("seed=8"));

    assert_eq!(cluster.drain_log().await.len(), 1);
    assert!(cluster.pool_ids().await.is_empty());
}

#[tokio::test]
async fn creation_failure_stops_before_drain() {
    let (cluster, mut scenario) = scenario(config(vec![2]), driver_config());
    cluster.fail_create_after(1).await;

    let failure = scenario.run().await.unwrap_err();
    assert_eq!(failure.failed_step(), "creation");
    assert_eq!(failure.stage, Stage::Init);
    assert!(failure.pool.is_none());
    assert!(cluster.drain_log().await.is_empty());
    assert!(cluster.pool_ids().await.is_empty());
}

#[tokio::test]
async fn rejected_drain_reports_rank_and_targets() {
    let (cluster, mut scenario) = scenario(config(vec![1]), driver_config());
    cluster.reject_drains("DER_INVAL(-1003): rank excluded").await;

    let failure = scenario.run().await.unwrap_err();
    let target = failure.target.unwrap();
    match &failure.source {
        HarnessError::DrainInvocation {
            rank,
            targets,
            reason,
            ..
        } => {
            assert_eq!(*rank, target.rank);
            assert_eq!(targets, &target.target_csv());
            assert!(reason.contains("DER_INVAL"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(cluster.pool_ids().await.is_empty());
}

#[tokio::test]
async fn unchanged_pool_version_fails_verification() {
    let (cluster, mut scenario) = scenario(config(vec![1]), driver_config());
    cluster.freeze_version().await;

    let failure = scenario.run().await.unwrap_err();
    assert_eq!(failure.failed_step(), "verification");
    assert_eq!(failure.pver, Some((1, 1)));
    assert!(failure.to_string().contains("pver=1->1"));

    let record = failure.record();
    assert_eq!(record.failed_step, "verification");
    assert_eq!(record.pool_count, 1);
    assert!(cluster.pool_ids().await.is_empty());
}

#[tokio::test]
async fn workload_failures_do_not_fail_the_drain() {
    let driver = SimulatedDriverConfig {
        failing_classes: HashSet::from(["SX".to_string()]),
        ..driver_config()
    };
    let (_, mut scenario) = scenario(config(vec![1]), driver);

    let report = scenario.run().await.unwrap();
    let pool = &report.iterations[0].pools[0];
    assert_eq!(pool.workloads.passed, 2);
    assert_eq!(pool.workloads.failed, 2);
    assert_eq!(report.workload_failures(), 2);
    assert!(pool.outcome.success);
}

#[test]
fn missing_servers_is_a_config_error() {
    let cluster = SimulatedCluster::new(SimulatedClusterConfig::default());
    let driver = Arc::new(SimulatedDriver::new(cluster.clone(), driver_config()));
    let mut config = config(vec![1]);
    config.servers.clear();

    match Scenario::new(config, Arc::new(cluster), driver) {
        Err(err) => assert_eq!(err.stage(), "config"),
        Ok(_) => panic!("scenario accepted a config without servers"),
    }
}
