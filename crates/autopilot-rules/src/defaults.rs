//! The built-in rule set, parameterized by `[thresholds]` and `[pool]`.

use autopilot_core::config::ThresholdConfig;
use autopilot_core::{EngineConfig, SignalKind, Snapshot, Trend};

use crate::rule::{Action, CoordinationRule, Priority};

/// Rules loaded at startup, in load order.
pub fn default_rules(config: &EngineConfig) -> Vec<CoordinationRule> {
    let ThresholdConfig {
        cpu_high,
        memory_high,
        cpu_low,
        predicted_load_high,
        resource_pressure_high,
        deploy_likelihood_high,
    } = config.thresholds.clone();

    let scale_up = Action::ScaleUp {
        factor: config.pool.scale_factor,
        cap: config.pool.max_agents,
    };
    let reclaim = Action::ReclaimIdle {
        timeout: config.idle_timeout(),
    };

    let mut pre_warm = CoordinationRule::new("pre-warm-environments", Priority::Low, move |s: &Snapshot| {
        signal_above(s, SignalKind::DeploymentLikelihood, deploy_likelihood_high)
    });
    for (environment, _) in config.configured_environments() {
        pre_warm = pre_warm.then(Action::PreWarm { environment });
    }

    let mut rules = vec![
        CoordinationRule::new("recover-failed-subsystems", Priority::Critical, |s: &Snapshot| {
            !s.failed_subsystems().is_empty()
        })
        .then(Action::RecoverFailed),
        CoordinationRule::new("isolate-unhealthy-agents", Priority::Critical, |s: &Snapshot| {
            !s.unhealthy_agents.is_empty()
        })
        .then(Action::IsolateUnhealthy),
        CoordinationRule::new("scale-on-high-load", Priority::High, move |s: &Snapshot| {
            s.metrics.cpu > cpu_high || s.metrics.memory > memory_high
        })
        .then(scale_up.clone()),
        CoordinationRule::new("anticipate-load", Priority::Medium, move |s: &Snapshot| {
            s.prediction(SignalKind::Load)
                .is_some_and(|p| p.trend == Trend::Increasing && p.value > predicted_load_high)
        })
        .then(scale_up),
        CoordinationRule::new("relieve-resource-pressure", Priority::Medium, move |s: &Snapshot| {
            signal_above(s, SignalKind::Resource, resource_pressure_high)
        })
        .then(reclaim.clone()),
    ];
    if !pre_warm.actions.is_empty() {
        rules.push(pre_warm);
    }
    rules.push(
        CoordinationRule::new("reclaim-idle-agents", Priority::Low, move |s: &Snapshot| {
            s.metrics.sampled_at > 0 && s.metrics.cpu < cpu_low
        })
        .then(reclaim),
    );
    rules
}

fn signal_above(snapshot: &Snapshot, kind: SignalKind, threshold: f64) -> bool {
    snapshot.prediction(kind).is_some_and(|p| p.value > threshold)
}
