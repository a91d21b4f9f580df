//! Health supervisor: subsystem status aggregation and recovery.
//!
//! The supervisor reads the status each `Managed` subsystem reports and
//! re-runs `initialize()` on any that report `Failed`. A failed recovery
//! is not retried until the next tick. It also probes agents and keeps
//! the unhealthy-agent flags the isolation rule reads, and probes each
//! environment's health endpoint.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use autopilot_core::{
    Agent, AgentId, AgentStatus, Clock, Environment, Managed, SubsystemId, SubsystemStatus,
};

use crate::checker::{ProbeResult, http_probe};

/// Last probe of an environment's health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentHealth {
    pub result: ProbeResult,
    pub checked_at: u64,
    /// Probes in a row that were not healthy.
    pub consecutive_failures: u32,
}

/// What a health tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthTick {
    pub recovered: Vec<SubsystemId>,
    /// Still `Failed` after a recovery attempt; retried next tick.
    pub still_failed: Vec<SubsystemId>,
}

/// Aggregates subsystem status and drives recovery.
pub struct HealthSupervisor {
    /// Registration order; startup follows it, shutdown reverses it.
    subsystems: Vec<Arc<dyn Managed>>,
    statuses: RwLock<BTreeMap<SubsystemId, SubsystemStatus>>,
    flagged: Mutex<BTreeSet<AgentId>>,
    /// Per-agent health URL; `{id}` is replaced with the agent id.
    agent_health_url: Option<String>,
    /// Health-check URL per environment.
    endpoints: BTreeMap<Environment, String>,
    environment_health: RwLock<BTreeMap<Environment, EnvironmentHealth>>,
    probe_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl HealthSupervisor {
    pub fn new(
        endpoints: BTreeMap<Environment, String>,
        probe_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            subsystems: Vec::new(),
            statuses: RwLock::new(BTreeMap::new()),
            flagged: Mutex::new(BTreeSet::new()),
            agent_health_url: None,
            endpoints,
            environment_health: RwLock::new(BTreeMap::new()),
            probe_timeout,
            clock,
        }
    }

    /// Probe agents at `template`, with `{id}` replaced by the agent id.
    pub fn with_agent_health_url(mut self, template: Option<String>) -> Self {
        self.agent_health_url = template;
        self
    }

    /// Put a subsystem under supervision.
    pub fn register(&mut self, subsystem: Arc<dyn Managed>) {
        debug!(subsystem = %subsystem.id(), "subsystem registered");
        self.subsystems.push(subsystem);
    }

    /// Initialize every subsystem in registration order.
    ///
    /// On the first failure, the subsystems already started are shut down
    /// in reverse order and the error is returned.
    pub async fn initialize_all(&self) -> anyhow::Result<()> {
        for (index, subsystem) in self.subsystems.iter().enumerate() {
            if let Err(e) = subsystem.initialize().await {
                warn!(subsystem = %subsystem.id(), error = %e, "subsystem failed to initialize");
                for started in self.subsystems[..index].iter().rev() {
                    started.shutdown().await;
                }
                self.refresh().await;
                return Err(e.context(format!("initializing {}", subsystem.id())));
            }
            info!(subsystem = %subsystem.id(), "subsystem initialized");
        }
        self.refresh().await;
        Ok(())
    }

    /// Shut down every subsystem in reverse registration order.
    pub async fn shutdown_all(&self) {
        for subsystem in self.subsystems.iter().rev() {
            subsystem.shutdown().await;
        }
        self.refresh().await;
        info!("all subsystems stopped");
    }

    /// Poll every subsystem and return the aggregated map.
    ///
    /// Subsystems that were never registered show as `NotFound`.
    pub async fn refresh(&self) -> BTreeMap<SubsystemId, SubsystemStatus> {
        let mut current: BTreeMap<SubsystemId, SubsystemStatus> = SubsystemId::ALL
            .iter()
            .map(|id| (*id, SubsystemStatus::NotFound))
            .collect();
        for subsystem in &self.subsystems {
            current.insert(subsystem.id(), subsystem.status());
        }

        let mut statuses = self.statuses.write().await;
        for (id, status) in &current {
            if let Some(prev) = statuses.get(id)
                && prev != status
            {
                info!(subsystem = %id, from = %prev, to = %status, "subsystem status changed");
            }
        }
        *statuses = current.clone();
        current
    }

    /// Status map as of the last refresh.
    pub async fn statuses(&self) -> BTreeMap<SubsystemId, SubsystemStatus> {
        self.statuses.read().await.clone()
    }

    /// Re-run initialization of one subsystem. Returns whether it recovered.
    pub async fn recover(&self, id: SubsystemId) -> bool {
        let Some(subsystem) = self.subsystems.iter().find(|s| s.id() == id) else {
            warn!(subsystem = %id, "recovery requested for unregistered subsystem");
            return false;
        };

        info!(subsystem = %id, "attempting recovery");
        match subsystem.initialize().await {
            Ok(()) => {
                info!(subsystem = %id, status = %subsystem.status(), "subsystem recovered");
                self.statuses.write().await.insert(id, subsystem.status());
                true
            }
            Err(e) => {
                warn!(subsystem = %id, error = %e, "recovery failed, retrying next tick");
                self.statuses.write().await.insert(id, SubsystemStatus::Failed);
                false
            }
        }
    }

    /// Refresh, then try to recover each `Failed` subsystem once.
    pub async fn tick(&self) -> HealthTick {
        let statuses = self.refresh().await;
        let mut outcome = HealthTick::default();
        for (id, status) in statuses {
            if status != SubsystemStatus::Failed {
                continue;
            }
            if self.recover(id).await {
                outcome.recovered.push(id);
            } else {
                outcome.still_failed.push(id);
            }
        }
        outcome
    }

    /// Mark an agent unhealthy. The next isolation action picks it up.
    pub async fn flag_agent(&self, agent_id: impl Into<AgentId>) {
        let agent_id = agent_id.into();
        if self.flagged.lock().await.insert(agent_id.clone()) {
            warn!(%agent_id, "agent flagged unhealthy");
        }
    }

    /// Agents currently flagged, without clearing them.
    pub async fn flagged_agents(&self) -> Vec<AgentId> {
        self.flagged.lock().await.iter().cloned().collect()
    }

    /// Drop the flags of agents that have been dealt with. Flags raised
    /// for other agents are kept.
    pub async fn clear_flags(&self, agent_ids: &[AgentId]) {
        let mut flagged = self.flagged.lock().await;
        for agent_id in agent_ids {
            flagged.remove(agent_id);
        }
    }

    /// Probe every agent still in rotation and flag the ones that fail.
    /// Returns the agents flagged by this check.
    pub async fn check_agents(&self, agents: &[Agent]) -> Vec<AgentId> {
        let Some(template) = &self.agent_health_url else {
            return Vec::new();
        };
        let mut flagged = Vec::new();
        for agent in agents {
            if !matches!(agent.status, AgentStatus::Active | AgentStatus::Idle) {
                continue;
            }
            let url = template.replace("{id}", &agent.id);
            let result = http_probe(&url, self.probe_timeout).await;
            if !result.is_healthy() {
                debug!(agent_id = %agent.id, %result, "agent health probe failed");
                self.flag_agent(agent.id.clone()).await;
                flagged.push(agent.id.clone());
            }
        }
        flagged
    }

    /// Probe every environment that has a health-check URL.
    pub async fn check_environments(&self) -> BTreeMap<Environment, ProbeResult> {
        let mut results = BTreeMap::new();
        for (env, url) in &self.endpoints {
            let result = http_probe(url, self.probe_timeout).await;
            self.record(*env, result).await;
            results.insert(*env, result);
        }
        results
    }

    /// Last recorded probe per environment.
    pub async fn environment_health(&self) -> BTreeMap<Environment, EnvironmentHealth> {
        self.environment_health.read().await.clone()
    }

    /// Probe one environment ahead of an expected deployment.
    ///
    /// An environment without a health-check URL is treated as ready.
    pub async fn pre_warm(&self, env: Environment) -> anyhow::Result<()> {
        let Some(url) = self.endpoints.get(&env) else {
            debug!(%env, "no health check configured, pre-warm skipped");
            return Ok(());
        };
        let result = http_probe(url, self.probe_timeout).await;
        self.record(env, result).await;
        if !result.is_healthy() {
            anyhow::bail!("{env} not ready: health probe {result}");
        }
        info!(%env, "environment pre-warmed");
        Ok(())
    }

    async fn record(&self, env: Environment, result: ProbeResult) {
        let mut health = self.environment_health.write().await;
        let consecutive_failures = match (result, health.get(&env)) {
            (ProbeResult::Healthy, _) => 0,
            (_, Some(prev)) => prev.consecutive_failures + 1,
            (_, None) => 1,
        };
        if !result.is_healthy() {
            warn!(%env, %result, consecutive_failures, "environment health check failed");
        }
        health.insert(
            env,
            EnvironmentHealth {
                result,
                checked_at: self.clock.now_secs(),
                consecutive_failures,
            },
        );
    }
}
