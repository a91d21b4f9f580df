//! Engine assembly and the four periodic loops.
//!
//! `Engine::start` builds every subsystem from `EngineConfig`, registers
//! them with the health supervisor and initializes them in order
//! (predictive feed, agent pool, deployment controller). A startup
//! failure stops whatever was already started and is returned to the
//! caller. `Engine::run` then drives:
//!
//! ```text
//! sample     ──► MetricSampler::sample()
//! predict    ──► PredictiveFeed::ingest(latest sample)
//! coordinate ──► HealthSupervisor::refresh() + check_agents() + check_environments()
//!                └── Snapshot ──► RuleEngine::tick(&Snapshot, &Subsystems)
//! report     ──► LifecycleReporter::emit(latest Snapshot + hit counts)
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use autopilot_core::{
    BoxFuture, Clock, EngineConfig, Environment, EnvironmentDescriptor, Managed, Snapshot,
    system_clock,
};
use autopilot_health::HealthSupervisor;
use autopilot_metrics::{MetricSampler, PredictiveFeed, ResourceProbe, SystemProbe};
use autopilot_pool::AgentPool;
use autopilot_report::{
    FanoutSink, JsonLinesSink, LifecycleReport, LifecycleReporter, PrometheusFileSink, ReportSink,
    TracingSink,
};
use autopilot_rollout::{
    DeployError, DeploymentController, Notifier, StageExecutor, WebhookNotifier,
};
use autopilot_rules::{Action, ActionTarget, RuleEngine, TickOutcome, default_rules};

use crate::stages::PipelineStages;
use crate::ticker::Ticker;

/// External collaborators the engine is built from.
pub struct EngineParts {
    pub probe: Arc<dyn ResourceProbe>,
    pub clock: Arc<dyn Clock>,
    pub executor: Arc<dyn StageExecutor>,
    pub notifier: Arc<dyn Notifier>,
    pub sink: Arc<dyn ReportSink>,
}

impl EngineParts {
    /// Real host probe, system clock, shell stages, webhooks, and the
    /// configured report sinks.
    pub fn production(config: &EngineConfig) -> Self {
        let clock = system_clock();
        Self {
            probe: Arc::new(SystemProbe::new(
                &config.sampler.data_path,
                config.sampler.network_capacity_mbps,
            )),
            executor: Arc::new(PipelineStages::new(config.stages.clone(), config.http_timeout())),
            notifier: Arc::new(webhook_notifier(config)),
            sink: report_sink(config),
            clock,
        }
    }
}

/// The subsystems rule actions are applied to.
pub struct Subsystems {
    pub pool: Arc<AgentPool>,
    pub deployments: Arc<DeploymentController>,
    pub feed: Arc<PredictiveFeed>,
    pub sampler: Arc<MetricSampler>,
    pub health: Arc<HealthSupervisor>,
}

impl ActionTarget for Subsystems {
    fn apply<'a>(
        &'a self,
        action: &'a Action,
        snapshot: &'a Snapshot,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            match action {
                Action::ScaleUp { factor, cap } => {
                    let created = self.pool.scale_up(*factor, *cap).await;
                    debug!(created = created.len(), "scale-up applied");
                }
                Action::ReclaimIdle { timeout } => {
                    let reclaimed = self.pool.reclaim_idle(*timeout).await;
                    debug!(reclaimed = reclaimed.len(), "idle reclaim applied");
                }
                Action::IsolateUnhealthy => {
                    // Only the agents this tick's snapshot saw; later flags wait.
                    for agent_id in &snapshot.unhealthy_agents {
                        // Unknown agents are logged by the pool.
                        self.pool.isolate(agent_id).await;
                    }
                    self.health.clear_flags(&snapshot.unhealthy_agents).await;
                }
                Action::RecoverFailed => {
                    let tick = self.health.tick().await;
                    if !tick.still_failed.is_empty() {
                        let names: Vec<&str> = tick.still_failed.iter().map(|id| id.as_str()).collect();
                        anyhow::bail!("recovery failed for {}", names.join(", "));
                    }
                }
                Action::PreWarm { environment } => {
                    match self.deployments.check_available(*environment).await {
                        Ok(()) => self.health.pre_warm(*environment).await?,
                        Err(DeployError::InProgress(env)) => {
                            warn!(%env, "pre-warm skipped, deployment in progress");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            Ok(())
        })
    }
}

/// A running coordination engine.
pub struct Engine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    subsystems: Arc<Subsystems>,
    rules: RuleEngine,
    reporter: LifecycleReporter,
    latest: RwLock<Option<Snapshot>>,
}

impl Engine {
    /// Build from production parts and initialize every subsystem.
    pub async fn start(config: EngineConfig) -> anyhow::Result<Self> {
        let parts = EngineParts::production(&config);
        Self::start_with(config, parts).await
    }

    /// Build from the given parts and initialize every subsystem.
    pub async fn start_with(config: EngineConfig, parts: EngineParts) -> anyhow::Result<Self> {
        config.validate()?;
        let EngineParts {
            probe,
            clock,
            executor,
            notifier,
            sink,
        } = parts;

        let sampler = Arc::new(
            MetricSampler::new(probe, clock.clone()).with_trend_delta(config.sampler.trend_delta),
        );
        let feed = Arc::new(PredictiveFeed::new(config.sampler.history));
        let pool = Arc::new(AgentPool::new(config.pool.clone(), clock.clone()));
        let deployments = Arc::new(DeploymentController::new(
            environments(&config),
            executor,
            notifier,
            clock.clone(),
        ));

        let mut health = HealthSupervisor::new(
            health_endpoints(&config),
            config.http_timeout(),
            clock.clone(),
        )
        .with_agent_health_url(config.pool.health_check_url.clone());
        health.register(feed.clone());
        health.register(pool.clone());
        health.register(deployments.clone());
        health.initialize_all().await?;

        let rules = RuleEngine::new(default_rules(&config))
            .with_confidence_threshold(config.engine.confidence_threshold);
        info!(
            rules = rules.rules().len(),
            environments = config.environments.len(),
            "coordination engine started"
        );

        Ok(Self {
            reporter: LifecycleReporter::new(sink, clock.clone()),
            subsystems: Arc::new(Subsystems {
                pool,
                deployments,
                feed,
                sampler,
                health: Arc::new(health),
            }),
            rules,
            clock,
            config,
            latest: RwLock::new(None),
        })
    }

    pub fn subsystems(&self) -> &Subsystems {
        &self.subsystems
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    /// Snapshot taken by the last coordination tick.
    pub async fn latest_snapshot(&self) -> Option<Snapshot> {
        self.latest.read().await.clone()
    }

    pub async fn sample_tick(&self) {
        if let Err(e) = self.subsystems.sampler.sample().await {
            warn!(error = %e, "metric sample failed");
        }
    }

    pub async fn predict_tick(&self) {
        match self.subsystems.sampler.latest().await {
            Some(metrics) => self.subsystems.feed.ingest(metrics).await,
            None => debug!("no sample yet, predictive tick skipped"),
        }
    }

    /// Observe health, build the tick's snapshot, and dispatch rules on it.
    pub async fn coordinate_tick(&self) -> TickOutcome {
        let health = &self.subsystems.health;
        health.refresh().await;
        health.check_agents(&self.subsystems.pool.snapshot().await).await;
        health.check_environments().await;

        let snapshot = self.snapshot().await;
        let outcome = self.rules.tick(&snapshot, self.subsystems.as_ref()).await;
        *self.latest.write().await = Some(snapshot);
        outcome
    }

    /// Report on the latest snapshot, taking one if none exists yet.
    pub async fn report_tick(&self) -> LifecycleReport {
        let snapshot = match self.latest_snapshot().await {
            Some(snapshot) => snapshot,
            None => self.snapshot().await,
        };
        let report = self.reporter.assemble(&snapshot, self.rules.hit_counts());
        self.reporter.emit(&report).await;
        report
    }

    /// Assemble a snapshot from every subsystem's current state.
    pub async fn snapshot(&self) -> Snapshot {
        let s = &self.subsystems;
        Snapshot {
            taken_at: self.clock.now_secs(),
            metrics: s.sampler.latest().await.unwrap_or_default(),
            predictions: s.feed.predict_all().await,
            subsystem_status: s.health.statuses().await,
            pool: s.pool.summary().await,
            unhealthy_agents: s.health.flagged_agents().await,
        }
    }

    /// Run the four loops until `shutdown` flips, then stop every subsystem.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let sample = Ticker::new("sample", self.config.sample_interval());
        let predict = Ticker::new("predict", self.config.predict_interval());
        let coordinate = Ticker::new("coordinate", self.config.coordinate_interval());
        let report = Ticker::new("report", self.config.report_interval());

        let handles = vec![
            spawn_loop(&self, &shutdown, sample, |engine| async move {
                engine.sample_tick().await;
            }),
            spawn_loop(&self, &shutdown, predict, |engine| async move {
                engine.predict_tick().await;
            }),
            spawn_loop(&self, &shutdown, coordinate, |engine| async move {
                engine.coordinate_tick().await;
            }),
            spawn_loop(&self, &shutdown, report, |engine| async move {
                engine.report_tick().await;
            }),
        ];

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "engine loop panicked");
            }
        }

        self.subsystems.health.shutdown_all().await;
        info!("coordination engine stopped");
    }
}

/// Spawn one loop; each tick gets its own handle on the engine.
fn spawn_loop<F, Fut>(
    engine: &Arc<Engine>,
    shutdown: &watch::Receiver<bool>,
    ticker: Ticker,
    task: F,
) -> JoinHandle<u64>
where
    F: Fn(Arc<Engine>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let engine = engine.clone();
    let shutdown = shutdown.clone();
    tokio::spawn(async move { ticker.run(shutdown, || task(engine.clone())).await })
}

/// Build a deployment controller from config with production stages and
/// webhooks, and bring it to `Ready`.
pub async fn deployment_controller(config: &EngineConfig) -> anyhow::Result<DeploymentController> {
    let controller = DeploymentController::new(
        environments(config),
        Arc::new(PipelineStages::new(config.stages.clone(), config.http_timeout())),
        Arc::new(webhook_notifier(config)),
        system_clock(),
    );
    controller.initialize().await?;
    Ok(controller)
}

fn environments(config: &EngineConfig) -> BTreeMap<Environment, EnvironmentDescriptor> {
    config.configured_environments().into_iter().collect()
}

fn health_endpoints(config: &EngineConfig) -> BTreeMap<Environment, String> {
    config
        .configured_environments()
        .into_iter()
        .filter_map(|(env, desc)| desc.health_check_url.map(|url| (env, url)))
        .collect()
}

fn webhook_notifier(config: &EngineConfig) -> WebhookNotifier {
    let endpoints = config
        .configured_environments()
        .into_iter()
        .filter_map(|(env, desc)| desc.webhook_url.map(|url| (env, url)))
        .collect();
    WebhookNotifier::new(endpoints, config.http_timeout())
}

fn report_sink(config: &EngineConfig) -> Arc<dyn ReportSink> {
    let mut sinks: Vec<Arc<dyn ReportSink>> = vec![Arc::new(TracingSink)];
    if let Some(path) = &config.report.path {
        sinks.push(Arc::new(JsonLinesSink::new(PathBuf::from(path))));
    }
    if let Some(path) = &config.report.prometheus_path {
        sinks.push(Arc::new(PrometheusFileSink::new(PathBuf::from(path))));
    }
    Arc::new(FanoutSink::new(sinks))
}
