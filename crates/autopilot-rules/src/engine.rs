//! Rule engine: decides which actions fire for a snapshot and hands them
//! to their target subsystems.
//!
//! `evaluate` is a pure function of the rule set and the snapshot: the
//! hit counters it keeps are written by `dispatch` and never read back
//! into a decision.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use autopilot_core::{BoxFuture, Snapshot};

use crate::rule::{Action, CoordinationRule, Priority};

/// Applies actions to the subsystems that own them.
pub trait ActionTarget: Send + Sync {
    fn apply<'a>(
        &'a self,
        action: &'a Action,
        snapshot: &'a Snapshot,
    ) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// One action chosen for dispatch, tagged with the rule that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedAction {
    pub rule: String,
    pub priority: Priority,
    pub action: Action,
}

/// What a dispatch pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    pub dispatched: Vec<DispatchedAction>,
    /// Rules with at least one failed action this tick, in dispatch order.
    pub failed_rules: Vec<String>,
}

pub struct RuleEngine {
    rules: Vec<CoordinationRule>,
    confidence_threshold: Option<f64>,
    hits: Mutex<BTreeMap<String, u64>>,
}

impl RuleEngine {
    pub fn new(rules: Vec<CoordinationRule>) -> Self {
        Self {
            rules,
            confidence_threshold: None,
            hits: Mutex::new(BTreeMap::new()),
        }
    }

    /// Hide predictions below `threshold` confidence from every condition.
    pub fn with_confidence_threshold(mut self, threshold: Option<f64>) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn rules(&self) -> &[CoordinationRule] {
        &self.rules
    }

    /// Actions for every rule whose condition holds, highest priority first.
    ///
    /// Rules of equal priority keep their load order.
    pub fn evaluate(&self, snapshot: &Snapshot) -> Vec<DispatchedAction> {
        let view = self.gate(snapshot);

        let mut fired: Vec<&CoordinationRule> =
            self.rules.iter().filter(|rule| rule.matches(&view)).collect();
        fired.sort_by_key(|rule| rule.priority);

        fired
            .into_iter()
            .flat_map(|rule| {
                rule.actions.iter().map(move |action| DispatchedAction {
                    rule: rule.name.clone(),
                    priority: rule.priority,
                    action: action.clone(),
                })
            })
            .collect()
    }

    /// Apply actions in order. A failing action marks its rule failed for
    /// this tick; the rest still run.
    pub async fn dispatch(
        &self,
        actions: Vec<DispatchedAction>,
        snapshot: &Snapshot,
        target: &dyn ActionTarget,
    ) -> TickOutcome {
        let mut failed_rules: Vec<String> = Vec::new();

        for dispatched in &actions {
            debug!(
                rule = %dispatched.rule,
                priority = %dispatched.priority,
                action = %dispatched.action,
                "dispatching action"
            );
            if let Err(e) = target.apply(&dispatched.action, snapshot).await {
                warn!(
                    rule = %dispatched.rule,
                    action = %dispatched.action,
                    error = %e,
                    "action failed, rule marked failed this tick"
                );
                if !failed_rules.contains(&dispatched.rule) {
                    failed_rules.push(dispatched.rule.clone());
                }
            }
        }

        self.record_hits(&actions);
        if !actions.is_empty() {
            info!(
                actions = actions.len(),
                failed_rules = failed_rules.len(),
                "coordination tick dispatched"
            );
        }

        TickOutcome {
            dispatched: actions,
            failed_rules,
        }
    }

    /// `evaluate` followed by `dispatch`.
    pub async fn tick(&self, snapshot: &Snapshot, target: &dyn ActionTarget) -> TickOutcome {
        let actions = self.evaluate(snapshot);
        self.dispatch(actions, snapshot, target).await
    }

    /// Times each rule fired, by rule name.
    pub fn hit_counts(&self) -> BTreeMap<String, u64> {
        match self.hits.lock() {
            Ok(hits) => hits.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record_hits(&self, actions: &[DispatchedAction]) {
        let mut hits = match self.hits.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut last: Option<&str> = None;
        for dispatched in actions {
            // Actions of one rule are contiguous.
            if last == Some(dispatched.rule.as_str()) {
                continue;
            }
            *hits.entry(dispatched.rule.clone()).or_insert(0) += 1;
            last = Some(dispatched.rule.as_str());
        }
    }

    fn gate<'a>(&self, snapshot: &'a Snapshot) -> Cow<'a, Snapshot> {
        let Some(threshold) = self.confidence_threshold else {
            return Cow::Borrowed(snapshot);
        };
        if snapshot.predictions.values().all(|p| p.confidence >= threshold) {
            return Cow::Borrowed(snapshot);
        }
        let mut gated = snapshot.clone();
        gated.predictions.retain(|kind, p| {
            let keep = p.confidence >= threshold;
            if !keep {
                debug!(signal = %kind, confidence = p.confidence, threshold, "prediction below confidence threshold");
            }
            keep
        });
        Cow::Owned(gated)
    }
}
