//! Deployment controller: drives runs through the stage pipeline.
//!
//! One run per environment may be pending at a time. A run walks
//! `Validate → Build → Migrate → Deploy → Verify` through the stage
//! executor and ends in `Monitor` on success. Migrate failures are
//! recorded as warnings; any other stage failure fails the run and emits
//! a rollback notification. The controller never rolls back itself.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use autopilot_core::{
    BoxFuture, Clock, DeploymentId, Environment, EnvironmentDescriptor, Managed, StatusCell,
    SubsystemId, SubsystemStatus,
};

use crate::error::{DeployError, DeployResult};
use crate::notify::{DeploymentEvent, EventStatus, Notifier};
use crate::stage::{DeploymentStage, StageExecutor};

/// Outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunResult {
    Pending,
    Success,
    Failed,
}

/// A single pass through the pipeline for one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRun {
    pub id: DeploymentId,
    pub environment: Environment,
    /// Current (or final) stage.
    pub stage: DeploymentStage,
    pub started_at: u64,
    pub finished_at: Option<u64>,
    pub result: RunResult,
    /// Non-fatal stage failures.
    pub warnings: Vec<String>,
    /// Message of the stage that failed the run.
    pub failure: Option<String>,
}

/// Claim on an environment returned by `begin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub id: DeploymentId,
    pub environment: Environment,
}

/// Runs deployments and tracks their state per environment.
pub struct DeploymentController {
    environments: BTreeMap<Environment, EnvironmentDescriptor>,
    executor: Arc<dyn StageExecutor>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    /// Pending run per environment.
    active: Mutex<HashMap<Environment, DeploymentRun>>,
    /// Finished runs, oldest first.
    history: RwLock<Vec<DeploymentRun>>,
    next_seq: AtomicU64,
    status: StatusCell,
}

impl DeploymentController {
    pub fn new(
        environments: BTreeMap<Environment, EnvironmentDescriptor>,
        executor: Arc<dyn StageExecutor>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            environments,
            executor,
            notifier,
            clock,
            active: Mutex::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(1),
            status: StatusCell::new(SubsystemId::Deployment),
        }
    }

    /// Claim `env` for a new run in `Pending`.
    ///
    /// Rejected with `InProgress` while another run for the same
    /// environment is pending; requests are never queued.
    pub async fn begin(&self, env: Environment) -> DeployResult<RunHandle> {
        let mut active = self.active.lock().await;
        if let Err(e) = self.admit(env, &active) {
            if matches!(e, DeployError::InProgress(_)) {
                warn!(%env, "deployment rejected, run already pending");
            }
            return Err(e);
        }

        let started_at = self.clock.now_secs();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let run = DeploymentRun {
            id: format!("{env}-{started_at}-{seq}"),
            environment: env,
            stage: DeploymentStage::Validate,
            started_at,
            finished_at: None,
            result: RunResult::Pending,
            warnings: Vec::new(),
            failure: None,
        };
        let handle = RunHandle {
            id: run.id.clone(),
            environment: env,
        };
        active.insert(env, run);
        if self.status.get() == SubsystemStatus::Ready {
            self.status.set(SubsystemStatus::Running);
        }

        info!(deployment_id = %handle.id, %env, "deployment run claimed");
        Ok(handle)
    }

    /// Whether `begin(env)` would currently be accepted. Claims nothing.
    pub async fn check_available(&self, env: Environment) -> DeployResult<()> {
        let active = self.active.lock().await;
        self.admit(env, &active)
    }

    fn admit(&self, env: Environment, active: &HashMap<Environment, DeploymentRun>) -> DeployResult<()> {
        let status = self.status.get();
        if !matches!(status, SubsystemStatus::Ready | SubsystemStatus::Running | SubsystemStatus::Degraded) {
            return Err(DeployError::Unavailable(status));
        }
        if !self.environments.contains_key(&env) {
            return Err(DeployError::UnknownEnvironment(env));
        }
        if active.get(&env).is_some_and(|run| run.result == RunResult::Pending) {
            return Err(DeployError::InProgress(env));
        }
        Ok(())
    }

    /// Drive a claimed run through the pipeline and return its final state.
    pub async fn execute(&self, handle: &RunHandle) -> DeployResult<DeploymentRun> {
        let env = handle.environment;
        let descriptor = self
            .environments
            .get(&env)
            .ok_or(DeployError::UnknownEnvironment(env))?;
        {
            let active = self.active.lock().await;
            if !active.get(&env).is_some_and(|run| run.id == handle.id) {
                return Err(DeployError::NotActive(handle.id.clone()));
            }
        }

        self.emit(handle, EventStatus::Started, descriptor).await;

        for stage in DeploymentStage::EXECUTED {
            self.update(env, |run| run.stage = stage).await;
            debug!(deployment_id = %handle.id, %stage, "stage starting");

            let outcome = self.executor.execute(stage, env, descriptor).await;
            if outcome.success {
                debug!(deployment_id = %handle.id, %stage, message = %outcome.message, "stage succeeded");
                continue;
            }

            if !stage.is_fatal() {
                warn!(
                    deployment_id = %handle.id,
                    %stage,
                    message = %outcome.message,
                    "non-fatal stage failed, continuing"
                );
                self.update(env, |run| run.warnings.push(format!("{stage}: {}", outcome.message)))
                    .await;
                continue;
            }

            warn!(
                deployment_id = %handle.id,
                %stage,
                message = %outcome.message,
                "stage failed, run aborted"
            );
            self.update(env, |run| {
                run.result = RunResult::Failed;
                run.failure = Some(format!("{stage}: {}", outcome.message));
            })
            .await;
            self.emit(handle, EventStatus::Rollback, descriptor).await;
            return self.finish(env).await;
        }

        self.update(env, |run| {
            run.stage = DeploymentStage::Monitor;
            run.result = RunResult::Success;
        })
        .await;
        info!(deployment_id = %handle.id, %env, "deployment succeeded, monitoring");
        self.emit(handle, EventStatus::Success, descriptor).await;
        self.finish(env).await
    }

    /// `begin` followed by `execute`.
    pub async fn deploy(&self, env: Environment) -> DeployResult<DeploymentRun> {
        let handle = self.begin(env).await?;
        self.execute(&handle).await
    }

    /// The pending run for an environment, if any.
    pub async fn active(&self, env: Environment) -> Option<DeploymentRun> {
        self.active.lock().await.get(&env).cloned()
    }

    /// Finished runs, oldest first.
    pub async fn history(&self) -> Vec<DeploymentRun> {
        self.history.read().await.clone()
    }

    /// Report that the controller can no longer run deployments.
    pub fn fail(&self, reason: &str) {
        warn!(%reason, "deployment controller failed");
        self.status.set(SubsystemStatus::Failed);
    }

    async fn update(&self, env: Environment, f: impl FnOnce(&mut DeploymentRun)) {
        if let Some(run) = self.active.lock().await.get_mut(&env) {
            f(run);
        }
    }

    async fn finish(&self, env: Environment) -> DeployResult<DeploymentRun> {
        let mut active = self.active.lock().await;
        let mut run = active
            .remove(&env)
            .ok_or_else(|| DeployError::NotActive(env.to_string()))?;
        run.finished_at = Some(self.clock.now_secs());

        if active.is_empty() && self.status.get() == SubsystemStatus::Running {
            self.status.set(SubsystemStatus::Ready);
        }
        drop(active);

        self.history.write().await.push(run.clone());
        Ok(run)
    }

    async fn emit(&self, handle: &RunHandle, status: EventStatus, descriptor: &EnvironmentDescriptor) {
        let event = DeploymentEvent {
            deployment_id: handle.id.clone(),
            environment: handle.environment,
            status,
            timestamp: self.clock.now_secs(),
            url: descriptor.base_url.clone(),
        };
        self.notifier.notify(event).await;
    }
}

impl Managed for DeploymentController {
    fn id(&self) -> SubsystemId {
        SubsystemId::Deployment
    }

    fn status(&self) -> SubsystemStatus {
        self.status.get()
    }

    fn initialize(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            if self.environments.is_empty() {
                anyhow::bail!("no deployment environments configured");
            }
            let pending = !self.active.lock().await.is_empty();
            self.status.set(if pending {
                SubsystemStatus::Running
            } else {
                SubsystemStatus::Ready
            });
            info!(environments = self.environments.len(), "deployment controller initialized");
            Ok(())
        })
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let pending = self.active.lock().await.len();
            if pending > 0 {
                warn!(pending, "deployment controller stopping with runs pending");
            }
            self.status.set(SubsystemStatus::Stopped);
            info!("deployment controller stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{CommandStages, StageOutcome};
    use autopilot_core::ManualClock;
    use autopilot_core::config::StageCommands;
    use std::collections::HashSet;
    use std::time::Duration;
    use std::sync::Mutex as StdMutex;

    /// Succeeds every stage except the ones listed.
    struct ScriptedStages {
        failing: HashSet<DeploymentStage>,
        calls: StdMutex<Vec<DeploymentStage>>,
    }

    impl ScriptedStages {
        fn failing(stages: &[DeploymentStage]) -> Arc<Self> {
            Arc::new(Self {
                failing: stages.iter().copied().collect(),
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<DeploymentStage> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl StageExecutor for ScriptedStages {
        fn execute<'a>(
            &'a self,
            stage: DeploymentStage,
            _env: Environment,
            _descriptor: &'a EnvironmentDescriptor,
        ) -> BoxFuture<'a, StageOutcome> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(stage);
                if self.failing.contains(&stage) {
                    StageOutcome::failed("exit status: 1")
                } else {
                    StageOutcome::ok("ok")
                }
            })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        events: StdMutex<Vec<DeploymentEvent>>,
    }

    impl RecordingNotifier {
        fn statuses(&self) -> Vec<EventStatus> {
            self.events.lock().unwrap().iter().map(|e| e.status).collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, event: DeploymentEvent) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                self.events.lock().unwrap().push(event);
            })
        }
    }

    fn environments() -> BTreeMap<Environment, EnvironmentDescriptor> {
        Environment::ALL
            .iter()
            .map(|env| {
                (
                    *env,
                    EnvironmentDescriptor {
                        base_url: format!("http://{env}.internal"),
                        webhook_url: None,
                        health_check_url: None,
                    },
                )
            })
            .collect()
    }

    async fn controller(
        stages: Arc<ScriptedStages>,
    ) -> (DeploymentController, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let controller = DeploymentController::new(
            environments(),
            stages,
            notifier.clone(),
            Arc::new(ManualClock::new(5_000)),
        );
        controller.initialize().await.unwrap();
        (controller, notifier)
    }

    #[tokio::test]
    async fn successful_run_ends_in_monitor() {
        let stages = ScriptedStages::failing(&[]);
        let (controller, notifier) = controller(stages.clone()).await;

        let run = controller.deploy(Environment::Staging).await.unwrap();
        assert_eq!(run.result, RunResult::Success);
        assert_eq!(run.stage, DeploymentStage::Monitor);
        assert_eq!(run.finished_at, Some(5_000));
        assert_eq!(stages.calls(), DeploymentStage::EXECUTED.to_vec());
        assert_eq!(notifier.statuses(), vec![EventStatus::Started, EventStatus::Success]);
        assert_eq!(controller.status(), SubsystemStatus::Ready);
    }

    #[tokio::test]
    async fn migrate_failure_is_a_warning() {
        let stages = ScriptedStages::failing(&[DeploymentStage::Migrate]);
        let (controller, _) = controller(stages.clone()).await;

        let run = controller.deploy(Environment::Staging).await.unwrap();
        assert_eq!(run.result, RunResult::Success);
        assert_eq!(run.warnings.len(), 1);
        assert!(stages.calls().contains(&DeploymentStage::Deploy));
    }

    #[tokio::test]
    async fn build_failure_stops_before_migrate() {
        let stages = ScriptedStages::failing(&[DeploymentStage::Build]);
        let (controller, notifier) = controller(stages.clone()).await;

        let run = controller.deploy(Environment::Staging).await.unwrap();
        assert_eq!(run.result, RunResult::Failed);
        assert_eq!(run.stage, DeploymentStage::Build);
        assert_eq!(
            stages.calls(),
            vec![DeploymentStage::Validate, DeploymentStage::Build]
        );
        assert_eq!(notifier.statuses(), vec![EventStatus::Started, EventStatus::Rollback]);
    }

    #[tokio::test]
    async fn deploy_failure_signals_rollback_without_monitor() {
        let stages = ScriptedStages::failing(&[DeploymentStage::Deploy]);
        let (controller, notifier) = controller(stages.clone()).await;

        let run = controller.deploy(Environment::Staging).await.unwrap();
        assert_eq!(run.result, RunResult::Failed);
        assert_ne!(run.stage, DeploymentStage::Monitor);
        assert!(run.failure.as_deref().unwrap().starts_with("deploy"));
        assert!(!stages.calls().contains(&DeploymentStage::Verify));

        let events = notifier.events.lock().unwrap().clone();
        let rollback = events.last().unwrap();
        assert_eq!(rollback.status, EventStatus::Rollback);
        assert_eq!(rollback.environment, Environment::Staging);
        assert_eq!(rollback.deployment_id, run.id);
    }

    #[tokio::test]
    async fn second_begin_for_same_environment_is_rejected() {
        let (controller, _) = controller(ScriptedStages::failing(&[])).await;

        let first = controller.begin(Environment::Production).await.unwrap();
        assert_eq!(
            controller.active(Environment::Production).await.unwrap().result,
            RunResult::Pending
        );

        let second = controller.begin(Environment::Production).await;
        assert!(matches!(second, Err(DeployError::InProgress(Environment::Production))));
        assert!(second.unwrap_err().to_string().contains("in progress"));

        // A different environment is unaffected.
        assert!(controller.begin(Environment::Staging).await.is_ok());

        // Once finished, the environment can be deployed again.
        controller.execute(&first).await.unwrap();
        assert!(controller.begin(Environment::Production).await.is_ok());
    }

    #[tokio::test]
    async fn timed_out_stage_command_fails_the_run() {
        let stages = CommandStages::new(StageCommands {
            deploy: Some("sleep 30".to_string()),
            ..Default::default()
        })
        .with_timeout(Duration::from_millis(200));
        let notifier = Arc::new(RecordingNotifier::default());
        let controller = DeploymentController::new(
            environments(),
            Arc::new(stages),
            notifier.clone(),
            Arc::new(ManualClock::new(5_000)),
        );
        controller.initialize().await.unwrap();

        let run = controller.deploy(Environment::Staging).await.unwrap();
        assert_eq!(run.result, RunResult::Failed);
        assert_eq!(run.stage, DeploymentStage::Deploy);
        assert!(run.failure.unwrap().contains("timed out"));
        assert_eq!(notifier.statuses(), vec![EventStatus::Started, EventStatus::Rollback]);
        assert!(controller.active(Environment::Staging).await.is_none());
    }

    #[tokio::test]
    async fn availability_check_claims_nothing() {
        let (controller, _) = controller(ScriptedStages::failing(&[])).await;

        controller.check_available(Environment::Production).await.unwrap();
        assert!(controller.active(Environment::Production).await.is_none());

        let handle = controller.begin(Environment::Production).await.unwrap();
        assert!(matches!(
            controller.check_available(Environment::Production).await,
            Err(DeployError::InProgress(Environment::Production))
        ));
        assert!(controller.check_available(Environment::Staging).await.is_ok());

        controller.execute(&handle).await.unwrap();
        assert!(controller.check_available(Environment::Production).await.is_ok());
    }

    #[tokio::test]
    async fn stale_handle_is_not_active() {
        let (controller, _) = controller(ScriptedStages::failing(&[])).await;
        let handle = controller.begin(Environment::Staging).await.unwrap();
        controller.execute(&handle).await.unwrap();

        assert!(matches!(
            controller.execute(&handle).await,
            Err(DeployError::NotActive(_))
        ));
    }

    #[tokio::test]
    async fn failed_controller_rejects_runs() {
        let (controller, _) = controller(ScriptedStages::failing(&[])).await;
        controller.fail("executor lost");
        assert!(matches!(
            controller.begin(Environment::Staging).await,
            Err(DeployError::Unavailable(SubsystemStatus::Failed))
        ));

        controller.initialize().await.unwrap();
        assert!(controller.begin(Environment::Staging).await.is_ok());
    }

    #[tokio::test]
    async fn history_keeps_finished_runs() {
        let (controller, _) = controller(ScriptedStages::failing(&[DeploymentStage::Verify])).await;
        controller.deploy(Environment::Staging).await.unwrap();
        controller.deploy(Environment::Staging).await.unwrap();

        let history = controller.history().await;
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| r.result == RunResult::Failed));
        assert_ne!(history[0].id, history[1].id);
    }

    #[tokio::test]
    async fn unconfigured_environment_is_rejected() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut envs = environments();
        envs.remove(&Environment::Production);
        let controller = DeploymentController::new(
            envs,
            ScriptedStages::failing(&[]),
            notifier,
            Arc::new(ManualClock::new(0)),
        );
        controller.initialize().await.unwrap();

        assert!(matches!(
            controller.begin(Environment::Production).await,
            Err(DeployError::UnknownEnvironment(Environment::Production))
        ));
    }

    #[tokio::test]
    async fn initialize_requires_environments() {
        let controller = DeploymentController::new(
            BTreeMap::new(),
            ScriptedStages::failing(&[]),
            Arc::new(RecordingNotifier::default()),
            Arc::new(ManualClock::new(0)),
        );
        assert!(controller.initialize().await.is_err());
    }
}
