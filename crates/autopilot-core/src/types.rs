//! Domain types shared by every autopilot subsystem.
//!
//! These types describe what the engine can see during one coordination
//! tick: resource metrics, predictions, subsystem statuses, and the agent
//! registry. All of them are plain values; owners hand out clones.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unique identifier for an agent in the pool.
pub type AgentId = String;

/// Unique identifier for a deployment run.
pub type DeploymentId = String;

// ── Subsystems ─────────────────────────────────────────────────────

/// A subsystem managed by the health supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsystemId {
    AgentPool,
    Deployment,
    PredictiveFeed,
}

impl SubsystemId {
    pub const ALL: [SubsystemId; 3] = [
        SubsystemId::AgentPool,
        SubsystemId::Deployment,
        SubsystemId::PredictiveFeed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubsystemId::AgentPool => "agent_pool",
            SubsystemId::Deployment => "deployment",
            SubsystemId::PredictiveFeed => "predictive_feed",
        }
    }
}

impl fmt::Display for SubsystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse lifecycle status reported by a subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubsystemStatus {
    /// Not registered with the supervisor.
    #[default]
    NotFound,
    /// Initialized and idle.
    Ready,
    /// Actively doing work.
    Running,
    /// Working, but with reduced capability.
    Degraded,
    /// Reported failure; eligible for recovery.
    Failed,
    /// Shut down.
    Stopped,
}

impl SubsystemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubsystemStatus::NotFound => "not_found",
            SubsystemStatus::Ready => "ready",
            SubsystemStatus::Running => "running",
            SubsystemStatus::Degraded => "degraded",
            SubsystemStatus::Failed => "failed",
            SubsystemStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SubsystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Metrics & predictions ─────────────────────────────────────────

/// Direction of a metric or prediction over recent samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    #[default]
    Stable,
    Increasing,
    Decreasing,
}

/// Resource utilization at one sampler tick. All values are percentages (0-100).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResourceMetrics {
    pub cpu: f64,
    pub memory: f64,
    pub network: f64,
    /// Used space of the volume backing the data store.
    pub data_store: f64,
    /// `Stable` or `Increasing`, relative to the previous sample.
    pub trend: Trend,
    /// Unix timestamp (seconds) of the sample.
    pub sampled_at: u64,
}

/// The three signals the predictive feed produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Load,
    DeploymentLikelihood,
    Resource,
}

impl SignalKind {
    pub const ALL: [SignalKind; 3] = [
        SignalKind::Load,
        SignalKind::DeploymentLikelihood,
        SignalKind::Resource,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Load => "load",
            SignalKind::DeploymentLikelihood => "deployment_likelihood",
            SignalKind::Resource => "resource",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a signal provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub value: f64,
    /// Confidence as a percentage (0-100). Advisory only.
    pub confidence: f64,
    pub trend: Trend,
}

// ── Agents ────────────────────────────────────────────────────────

/// Lifecycle state of a pooled agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Starting,
    Active,
    Idle,
    Isolated,
    Stopped,
}

/// A worker agent in the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub kind: String,
    pub status: AgentStatus,
    /// Unix timestamp (seconds) when the agent was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the agent's last recorded activity.
    pub last_activity_at: u64,
}

/// Agent counts by status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PoolSummary {
    /// Every agent that is not stopped.
    pub total: u32,
    pub active: u32,
    pub idle: u32,
    pub isolated: u32,
    pub stopped: u32,
}

impl PoolSummary {
    /// Count agents by status.
    pub fn from_agents(agents: &[Agent]) -> Self {
        let mut summary = PoolSummary::default();
        for agent in agents {
            match agent.status {
                AgentStatus::Starting | AgentStatus::Active => summary.active += 1,
                AgentStatus::Idle => summary.idle += 1,
                AgentStatus::Isolated => summary.isolated += 1,
                AgentStatus::Stopped => summary.stopped += 1,
            }
        }
        summary.total = summary.active + summary.idle + summary.isolated;
        summary
    }
}

// ── Environments ──────────────────────────────────────────────────

/// A deployment target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Staging,
    Production,
}

impl Environment {
    pub const ALL: [Environment; 2] = [Environment::Staging, Environment::Production];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

// ── Snapshot ──────────────────────────────────────────────────────

/// Everything the rule engine may look at during one coordination tick.
///
/// Built once per tick and never mutated; every consumer within the tick
/// reads the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Snapshot {
    /// Unix timestamp (seconds) when the snapshot was taken.
    pub taken_at: u64,
    pub metrics: ResourceMetrics,
    pub predictions: BTreeMap<SignalKind, Prediction>,
    pub subsystem_status: BTreeMap<SubsystemId, SubsystemStatus>,
    pub pool: PoolSummary,
    /// Agents flagged unhealthy and not yet isolated.
    pub unhealthy_agents: Vec<AgentId>,
}

impl Snapshot {
    /// Status of a subsystem, `NotFound` if it is not registered.
    pub fn status_of(&self, id: SubsystemId) -> SubsystemStatus {
        self.subsystem_status.get(&id).copied().unwrap_or_default()
    }

    /// Subsystems currently reporting `Failed`.
    pub fn failed_subsystems(&self) -> Vec<SubsystemId> {
        self.subsystem_status
            .iter()
            .filter(|(_, status)| **status == SubsystemStatus::Failed)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn prediction(&self, kind: SignalKind) -> Option<&Prediction> {
        self.predictions.get(&kind)
    }
}
