//! End-to-end behavior of the assembled engine.
//!
//! Everything external (host probe, clock, stage commands, webhooks,
//! report sink) is replaced with in-process fakes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use autopilot_core::{
    AgentStatus, BoxFuture, EngineConfig, Environment, EnvironmentDescriptor, ManualClock, Managed,
    SubsystemId, SubsystemStatus,
};
use autopilot_metrics::{ResourceReading, ScriptedProbe};
use autopilot_pool::AgentPool;
use autopilot_report::{LifecycleReport, ReportSink};
use autopilot_rollout::{
    DeployError, DeploymentController, DeploymentEvent, DeploymentStage, EventStatus, Notifier,
    RunResult, StageExecutor, StageOutcome,
};
use autopilot_rules::{Action, ActionTarget, DispatchedAction, Priority};
use autopilotd::{Engine, EngineParts};

// ── Fakes ─────────────────────────────────────────────────────────

struct FailingStage(Option<DeploymentStage>);

impl StageExecutor for FailingStage {
    fn execute<'a>(
        &'a self,
        stage: DeploymentStage,
        _env: Environment,
        _descriptor: &'a EnvironmentDescriptor,
    ) -> BoxFuture<'a, StageOutcome> {
        Box::pin(async move {
            if self.0 == Some(stage) {
                StageOutcome::failed("exit status: 1")
            } else {
                StageOutcome::ok("ok")
            }
        })
    }
}

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<DeploymentEvent>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: DeploymentEvent) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.events.lock().unwrap().push(event);
        })
    }
}

#[derive(Default)]
struct MemorySink {
    reports: Mutex<Vec<LifecycleReport>>,
}

impl ReportSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn write<'a>(&'a self, report: &'a LifecycleReport) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.reports.lock().unwrap().push(report.clone());
            Ok(())
        })
    }
}

fn config() -> EngineConfig {
    EngineConfig::from_toml(
        r#"
[engine]
sample_interval = "1s"
predict_interval = "2s"
coordinate_interval = "1s"
report_interval = "2s"

[pool]
initial_size = 4

[environments.staging]
base_url = "http://staging.internal"

[environments.production]
base_url = "http://prod.internal"
"#,
    )
    .unwrap()
}

fn environments() -> BTreeMap<Environment, EnvironmentDescriptor> {
    config().configured_environments().into_iter().collect()
}

fn reading(cpu: f64, memory: f64) -> ResourceReading {
    ResourceReading {
        cpu,
        memory,
        ..Default::default()
    }
}

async fn engine(readings: Vec<ResourceReading>) -> (Engine, Arc<MemorySink>) {
    engine_with(config(), readings).await
}

async fn engine_with(config: EngineConfig, readings: Vec<ResourceReading>) -> (Engine, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::default());
    let parts = EngineParts {
        probe: Arc::new(ScriptedProbe::new(readings)),
        clock: Arc::new(ManualClock::new(10_000)),
        executor: Arc::new(FailingStage(None)),
        notifier: Arc::new(RecordingNotifier::default()),
        sink: sink.clone(),
    };
    let engine = Engine::start_with(config, parts).await.unwrap();
    (engine, sink)
}

// ── Scenarios ─────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_scale_up_from_four_to_six() {
    let pool = AgentPool::new(config().pool, Arc::new(ManualClock::new(0)));
    pool.initialize().await.unwrap();
    assert_eq!(pool.size().await, 4);

    let created = pool.scale_up(1.5, 50).await;
    assert_eq!(created.len(), 2);
    assert_eq!(pool.size().await, 6);
}

#[tokio::test]
async fn scenario_b_reclaim_only_stale_agents() {
    let clock = Arc::new(ManualClock::new(0));
    let mut pool_config = config().pool;
    pool_config.initial_size = 2;
    let pool = AgentPool::new(pool_config, clock.clone());
    pool.initialize().await.unwrap();

    let agents = pool.snapshot().await;
    let (stale, fresh) = (agents[0].id.clone(), agents[1].id.clone());

    clock.advance(4 * 60);
    assert!(pool.record_activity(&fresh).await);
    clock.advance(2 * 60);

    let reclaimed = pool.reclaim_idle(Duration::from_secs(5 * 60)).await;
    assert_eq!(reclaimed, vec![stale.clone()]);

    let agents = pool.snapshot().await;
    let status = |id: &str| agents.iter().find(|a| a.id == id).unwrap().status;
    assert_eq!(status(&stale), AgentStatus::Idle);
    assert_eq!(status(&fresh), AgentStatus::Active);
}

#[tokio::test]
async fn scenario_c_failed_deploy_signals_rollback() {
    let notifier = Arc::new(RecordingNotifier::default());
    let controller = DeploymentController::new(
        environments(),
        Arc::new(FailingStage(Some(DeploymentStage::Deploy))),
        notifier.clone(),
        Arc::new(ManualClock::new(1_000)),
    );
    controller.initialize().await.unwrap();

    let run = controller.deploy(Environment::Staging).await.unwrap();
    assert_eq!(run.result, RunResult::Failed);
    assert_eq!(run.stage, DeploymentStage::Deploy);

    let events = notifier.events.lock().unwrap();
    let rollback: Vec<_> = events
        .iter()
        .filter(|e| e.status == EventStatus::Rollback)
        .collect();
    assert_eq!(rollback.len(), 1);
    assert_eq!(rollback[0].environment, Environment::Staging);
    assert!(events.iter().all(|e| e.status != EventStatus::Success));
}

#[tokio::test]
async fn scenario_d_concurrent_deploys_to_production() {
    let controller = DeploymentController::new(
        environments(),
        Arc::new(FailingStage(None)),
        Arc::new(RecordingNotifier::default()),
        Arc::new(ManualClock::new(1_000)),
    );
    controller.initialize().await.unwrap();

    let first = controller.begin(Environment::Production).await.unwrap();
    let pending = controller.active(Environment::Production).await.unwrap();
    assert_eq!(pending.id, first.id);
    assert_eq!(pending.result, RunResult::Pending);

    let second = controller.begin(Environment::Production).await.unwrap_err();
    assert!(matches!(second, DeployError::InProgress(Environment::Production)));
    assert_eq!(second.to_string(), "deployment in progress for production");
}

// ── Engine ────────────────────────────────────────────────────────

#[tokio::test]
async fn high_load_tick_scales_the_pool() {
    let (engine, sink) = engine(vec![reading(92.0, 40.0)]).await;

    engine.sample_tick().await;
    engine.predict_tick().await;
    let outcome = engine.coordinate_tick().await;

    let rules: Vec<&str> = outcome.dispatched.iter().map(|a| a.rule.as_str()).collect();
    assert!(rules.contains(&"scale-on-high-load"));
    assert!(outcome.failed_rules.is_empty());
    assert_eq!(engine.subsystems().pool.size().await, 6);

    let report = engine.report_tick().await;
    assert_eq!(report.rule_hit_counts["scale-on-high-load"], 1);
    assert_eq!(report.subsystem_status[&SubsystemId::AgentPool], SubsystemStatus::Ready);
    assert_eq!(sink.reports.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn failed_subsystem_is_recovered_by_rule() {
    let (engine, _) = engine(vec![reading(50.0, 50.0)]).await;
    engine.subsystems().feed.fail("model unavailable");

    let outcome = engine.coordinate_tick().await;
    assert_eq!(outcome.dispatched[0].rule, "recover-failed-subsystems");
    assert!(outcome.failed_rules.is_empty());
    assert_eq!(engine.subsystems().feed.status(), SubsystemStatus::Ready);

    let snapshot = engine.latest_snapshot().await.unwrap();
    assert_eq!(snapshot.status_of(SubsystemId::PredictiveFeed), SubsystemStatus::Failed);
}

#[tokio::test]
async fn flagged_agent_is_isolated() {
    let (engine, _) = engine(vec![reading(50.0, 50.0)]).await;
    let target = engine.subsystems().pool.snapshot().await[1].id.clone();
    engine.subsystems().health.flag_agent(target.clone()).await;

    let outcome = engine.coordinate_tick().await;
    assert_eq!(outcome.dispatched[0].rule, "isolate-unhealthy-agents");

    let agents = engine.subsystems().pool.snapshot().await;
    let agent = agents.iter().find(|a| a.id == target).unwrap();
    assert_eq!(agent.status, AgentStatus::Isolated);
    assert!(engine.subsystems().health.flagged_agents().await.is_empty());
}

#[tokio::test]
async fn isolation_only_touches_agents_in_the_snapshot() {
    let (engine, _) = engine(vec![reading(50.0, 50.0)]).await;
    let agents = engine.subsystems().pool.snapshot().await;
    let (seen, late) = (agents[0].id.clone(), agents[1].id.clone());
    let health = &engine.subsystems().health;

    health.flag_agent(seen.clone()).await;
    let snapshot = engine.snapshot().await;
    health.flag_agent(late.clone()).await;

    engine
        .subsystems()
        .apply(&Action::IsolateUnhealthy, &snapshot)
        .await
        .unwrap();

    let agents = engine.subsystems().pool.snapshot().await;
    let status = |id: &str| agents.iter().find(|a| a.id == id).unwrap().status;
    assert_eq!(status(&seen), AgentStatus::Isolated);
    assert_eq!(status(&late), AgentStatus::Active);
    assert_eq!(health.flagged_agents().await, vec![late]);
}

fn pre_warm(environment: Environment) -> DispatchedAction {
    DispatchedAction {
        rule: "pre-warm-environments".to_string(),
        priority: Priority::Low,
        action: Action::PreWarm { environment },
    }
}

#[tokio::test]
async fn pre_warm_defers_to_a_pending_deployment() {
    let mut config = config();
    if let Some(production) = config.environments.get_mut("production") {
        production.health_check_url = Some("http://127.0.0.1:1/healthz".to_string());
    }
    let (engine, _) = engine_with(config, vec![reading(50.0, 50.0)]).await;
    let snapshot = engine.snapshot().await;

    // Nothing pending: the health check runs and the unreachable endpoint fails the rule.
    let outcome = engine
        .rules()
        .dispatch(vec![pre_warm(Environment::Production)], &snapshot, engine.subsystems())
        .await;
    assert_eq!(outcome.failed_rules, vec!["pre-warm-environments".to_string()]);
    let checked = engine.subsystems().health.environment_health().await;
    assert_eq!(checked[&Environment::Production].consecutive_failures, 1);

    // A pending run claims the environment: pre-warm is skipped, nothing is checked.
    let deployments = &engine.subsystems().deployments;
    let handle = deployments.begin(Environment::Production).await.unwrap();
    let outcome = engine
        .rules()
        .dispatch(vec![pre_warm(Environment::Production)], &snapshot, engine.subsystems())
        .await;
    assert!(outcome.failed_rules.is_empty());
    let checked = engine.subsystems().health.environment_health().await;
    assert_eq!(checked[&Environment::Production].consecutive_failures, 1);
    assert_eq!(
        deployments.active(Environment::Production).await.unwrap().id,
        handle.id
    );
}

#[tokio::test]
async fn startup_rejects_zero_interval() {
    let mut config = config();
    config.engine.sample_interval = "0s".to_string();
    let parts = EngineParts {
        probe: Arc::new(ScriptedProbe::new(vec![reading(10.0, 10.0)])),
        clock: Arc::new(ManualClock::new(0)),
        executor: Arc::new(FailingStage(None)),
        notifier: Arc::new(RecordingNotifier::default()),
        sink: Arc::new(MemorySink::default()),
    };
    let err = Engine::start_with(config, parts).await.err().unwrap();
    assert!(err.to_string().contains("engine.sample_interval"));
}

#[tokio::test]
async fn startup_without_environments_fails() {
    let parts = EngineParts {
        probe: Arc::new(ScriptedProbe::new(vec![reading(10.0, 10.0)])),
        clock: Arc::new(ManualClock::new(0)),
        executor: Arc::new(FailingStage(None)),
        notifier: Arc::new(RecordingNotifier::default()),
        sink: Arc::new(MemorySink::default()),
    };
    let result = Engine::start_with(EngineConfig::default(), parts).await;
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn loops_run_until_shutdown_then_stop_subsystems() {
    let (engine, sink) = engine(vec![reading(20.0, 30.0)]).await;
    let engine = Arc::new(engine);
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn(engine.clone().run(rx));
    tokio::time::sleep(Duration::from_millis(4_500)).await;
    tx.send(true).unwrap();
    handle.await.unwrap();

    // Reports at 0s, 2s and 4s.
    assert_eq!(sink.reports.lock().unwrap().len(), 3);
    assert!(engine.latest_snapshot().await.is_some());
    assert_eq!(engine.subsystems().pool.status(), SubsystemStatus::Stopped);
    assert_eq!(engine.subsystems().deployments.status(), SubsystemStatus::Stopped);
}
