//! Coordination rules and the actions they dispatch.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use autopilot_core::{Environment, Snapshot};

/// Dispatch priority. Declaration order is sort order: `Critical` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pure predicate over a snapshot.
pub type Condition = Arc<dyn Fn(&Snapshot) -> bool + Send + Sync>;

/// Operation a rule asks a subsystem to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Grow the agent pool.
    ScaleUp { factor: f64, cap: u32 },
    /// Demote agents inactive for longer than `timeout`.
    ReclaimIdle { timeout: Duration },
    /// Isolate every agent flagged unhealthy.
    IsolateUnhealthy,
    /// Re-initialize every failed subsystem.
    RecoverFailed,
    /// Probe an environment ahead of a likely deployment.
    PreWarm { environment: Environment },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::ScaleUp { factor, cap } => write!(f, "scale_up(factor={factor}, cap={cap})"),
            Action::ReclaimIdle { timeout } => write!(f, "reclaim_idle(timeout={timeout:?})"),
            Action::IsolateUnhealthy => f.write_str("isolate_unhealthy"),
            Action::RecoverFailed => f.write_str("recover_failed"),
            Action::PreWarm { environment } => write!(f, "pre_warm({environment})"),
        }
    }
}

/// A named condition and the actions it triggers.
///
/// Rules are immutable once built and loaded once at startup.
#[derive(Clone)]
pub struct CoordinationRule {
    pub name: String,
    pub priority: Priority,
    condition: Condition,
    pub actions: Vec<Action>,
}

impl CoordinationRule {
    pub fn new(
        name: impl Into<String>,
        priority: Priority,
        condition: impl Fn(&Snapshot) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            condition: Arc::new(condition),
            actions: Vec::new(),
        }
    }

    /// Append an action.
    pub fn then(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        (self.condition)(snapshot)
    }
}

impl fmt::Debug for CoordinationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinationRule")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_sorts_first() {
        let mut priorities = vec![Priority::Low, Priority::Critical, Priority::Medium, Priority::High];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![Priority::Critical, Priority::High, Priority::Medium, Priority::Low]
        );
    }

    #[test]
    fn rule_evaluates_its_condition() {
        let rule = CoordinationRule::new("busy", Priority::High, |s: &Snapshot| s.metrics.cpu > 50.0)
            .then(Action::RecoverFailed);
        let mut snapshot = Snapshot::default();
        assert!(!rule.matches(&snapshot));
        snapshot.metrics.cpu = 75.0;
        assert!(rule.matches(&snapshot));
        assert_eq!(rule.actions, vec![Action::RecoverFailed]);
    }

    #[test]
    fn actions_display_their_parameters() {
        let action = Action::ScaleUp { factor: 1.5, cap: 50 };
        assert_eq!(action.to_string(), "scale_up(factor=1.5, cap=50)");
        assert_eq!(
            Action::PreWarm { environment: Environment::Staging }.to_string(),
            "pre_warm(staging)"
        );
    }
}
