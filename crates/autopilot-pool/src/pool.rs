//! Agent pool: manages the registry of worker agents.
//!
//! Supports multiplicative scale-up with a hard cap, idle reclaim,
//! isolation of unhealthy agents, and least-recently-used assignment.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use autopilot_core::config::PoolConfig;
use autopilot_core::{
    Agent, AgentId, AgentStatus, BoxFuture, Clock, Managed, PoolSummary, StatusCell, SubsystemId,
    SubsystemStatus,
};

/// Owns every agent created during the run.
pub struct AgentPool {
    config: PoolConfig,
    clock: Arc<dyn Clock>,
    agents: Mutex<Vec<Agent>>,
    next_seq: AtomicU64,
    status: StatusCell,
}

impl AgentPool {
    /// Create an empty pool. Call `initialize()` to warm it up.
    pub fn new(config: PoolConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            agents: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(1),
            status: StatusCell::new(SubsystemId::AgentPool),
        }
    }

    /// Grow the pool to `min(size * factor, cap)`, rounding up.
    ///
    /// New agents are created in `Starting` and moved straight to `Active`.
    /// An empty pool grows to one agent. Returns the ids of created agents;
    /// empty when the pool is already at or above `cap`.
    pub async fn scale_up(&self, factor: f64, cap: u32) -> Vec<AgentId> {
        let mut agents = self.agents.lock().await;
        let current = live_count(&agents);

        if current >= cap {
            debug!(current, cap, "pool at cap, scale-up skipped");
            return Vec::new();
        }

        let factor = if factor.is_finite() { factor.max(1.0) } else { 1.0 };
        // min(0 * factor, cap) would never leave an empty pool; seed one agent.
        let target = if current == 0 {
            1
        } else {
            ((current as f64) * factor).ceil() as u32
        }
        .min(cap);

        let mut created = Vec::new();
        for _ in current..target {
            let mut agent = self.new_agent();
            agent.status = AgentStatus::Active;
            debug!(agent_id = %agent.id, "agent started");
            created.push(agent.id.clone());
            agents.push(agent);
        }

        if !created.is_empty() {
            info!(from = current, to = target, cap, "scaled up agent pool");
            self.mark_running();
        }
        created
    }

    /// Move agents whose last activity is strictly older than `timeout` to `Idle`.
    ///
    /// Returns the ids of agents that changed state.
    pub async fn reclaim_idle(&self, timeout: Duration) -> Vec<AgentId> {
        let now = self.clock.now_secs();
        let mut agents = self.agents.lock().await;

        let mut reclaimed = Vec::new();
        for agent in agents.iter_mut() {
            let active = matches!(agent.status, AgentStatus::Active | AgentStatus::Starting);
            let idle_for = Duration::from_secs(now.saturating_sub(agent.last_activity_at));
            if active && idle_for > timeout {
                agent.status = AgentStatus::Idle;
                reclaimed.push(agent.id.clone());
            }
        }

        if !reclaimed.is_empty() {
            info!(count = reclaimed.len(), timeout_ms = timeout.as_millis() as u64, "reclaimed idle agents");
        }
        reclaimed
    }

    /// Take an agent out of rotation. Unknown or stopped agents are ignored.
    pub async fn isolate(&self, agent_id: &str) -> bool {
        let mut agents = self.agents.lock().await;
        let Some(agent) = agents.iter_mut().find(|a| a.id == agent_id) else {
            warn!(%agent_id, "isolate requested for unknown agent");
            return false;
        };
        if agent.status == AgentStatus::Stopped {
            warn!(%agent_id, "isolate requested for stopped agent");
            return false;
        }
        if agent.status != AgentStatus::Isolated {
            agent.status = AgentStatus::Isolated;
            info!(%agent_id, "agent isolated");
        }

        let summary = PoolSummary::from_agents(&agents);
        if summary.isolated * 2 > summary.total {
            self.status.set(SubsystemStatus::Degraded);
        }
        true
    }

    /// Record work done by an agent. Revives an idle agent.
    pub async fn record_activity(&self, agent_id: &str) -> bool {
        let now = self.clock.now_secs();
        let mut agents = self.agents.lock().await;
        match agents.iter_mut().find(|a| a.id == agent_id) {
            Some(agent) if matches!(agent.status, AgentStatus::Active | AgentStatus::Idle) => {
                agent.status = AgentStatus::Active;
                agent.last_activity_at = now;
                true
            }
            Some(agent) => {
                debug!(%agent_id, status = ?agent.status, "activity ignored for agent out of rotation");
                false
            }
            None => {
                warn!(%agent_id, "activity recorded for unknown agent");
                false
            }
        }
    }

    /// Pick an agent for a task: least recently active `Active` agent
    /// first, then `Idle`. Isolated and stopped agents are never chosen.
    pub async fn assign(&self) -> Option<AgentId> {
        let now = self.clock.now_secs();
        let mut agents = self.agents.lock().await;

        let pick = |status: AgentStatus, agents: &[Agent]| {
            agents
                .iter()
                .enumerate()
                .filter(|(_, a)| a.status == status)
                .min_by_key(|(_, a)| a.last_activity_at)
                .map(|(i, _)| i)
        };

        let index = pick(AgentStatus::Active, &agents).or_else(|| pick(AgentStatus::Idle, &agents))?;
        let agent = &mut agents[index];
        agent.status = AgentStatus::Active;
        agent.last_activity_at = now;
        debug!(agent_id = %agent.id, "task assigned");
        Some(agent.id.clone())
    }

    /// Read-only copy of the registry.
    pub async fn snapshot(&self) -> Vec<Agent> {
        self.agents.lock().await.clone()
    }

    pub async fn summary(&self) -> PoolSummary {
        PoolSummary::from_agents(&self.agents.lock().await)
    }

    /// Agents that are not stopped.
    pub async fn size(&self) -> u32 {
        live_count(&self.agents.lock().await)
    }

    /// Report that the pool can no longer serve work.
    pub fn fail(&self, reason: &str) {
        warn!(%reason, "agent pool failed");
        self.status.set(SubsystemStatus::Failed);
    }

    fn new_agent(&self) -> Agent {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now_secs();
        Agent {
            id: format!("{}-{seq:04}", self.config.agent_kind),
            kind: self.config.agent_kind.clone(),
            status: AgentStatus::Starting,
            created_at: now,
            last_activity_at: now,
        }
    }

    fn mark_running(&self) {
        if self.status.get() == SubsystemStatus::Ready {
            self.status.set(SubsystemStatus::Running);
        }
    }
}

impl Managed for AgentPool {
    fn id(&self) -> SubsystemId {
        SubsystemId::AgentPool
    }

    fn status(&self) -> SubsystemStatus {
        self.status.get()
    }

    /// Warm the pool up to `initial_size` live agents.
    fn initialize(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            let mut agents = self.agents.lock().await;
            let current = live_count(&agents);
            let needed = self.config.initial_size.saturating_sub(current);
            for _ in 0..needed {
                let mut agent = self.new_agent();
                agent.status = AgentStatus::Active;
                agents.push(agent);
            }
            self.status.set(SubsystemStatus::Ready);
            info!(
                initial = self.config.initial_size,
                warmed = needed,
                "agent pool warmed"
            );
            Ok(())
        })
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut agents = self.agents.lock().await;
            for agent in agents.iter_mut() {
                agent.status = AgentStatus::Stopped;
            }
            self.status.set(SubsystemStatus::Stopped);
            info!(agents = agents.len(), "agent pool stopped");
        })
    }
}

fn live_count(agents: &[Agent]) -> u32 {
    agents
        .iter()
        .filter(|a| a.status != AgentStatus::Stopped)
        .count() as u32
}
