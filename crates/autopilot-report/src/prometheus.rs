//! Prometheus text exposition of a lifecycle report.

use std::fmt::Write;

use crate::report::LifecycleReport;

/// Render a report in Prometheus text format.
///
/// Subsystem statuses become a one-hot `status` label so every state is
/// queryable; rule hits are counters labelled by rule.
pub fn render_prometheus(report: &LifecycleReport) -> String {
    let mut out = String::new();

    out.push_str("# HELP autopilot_uptime_seconds Seconds since the engine started.\n");
    out.push_str("# TYPE autopilot_uptime_seconds gauge\n");
    let _ = writeln!(out, "autopilot_uptime_seconds {}", report.uptime_secs);

    out.push_str("# HELP autopilot_agent_pool_size Agents that are not stopped.\n");
    out.push_str("# TYPE autopilot_agent_pool_size gauge\n");
    let _ = writeln!(out, "autopilot_agent_pool_size {}", report.agent_pool_size);

    out.push_str("# HELP autopilot_resource_percent Sampled resource utilization.\n");
    out.push_str("# TYPE autopilot_resource_percent gauge\n");
    for (resource, value) in [
        ("cpu", report.metrics.cpu),
        ("memory", report.metrics.memory),
        ("network", report.metrics.network),
        ("data_store", report.metrics.data_store),
    ] {
        let _ = writeln!(out, "autopilot_resource_percent{{resource=\"{resource}\"}} {value:.2}");
    }

    out.push_str("# HELP autopilot_subsystem_status Current subsystem status (1 = in state).\n");
    out.push_str("# TYPE autopilot_subsystem_status gauge\n");
    for (subsystem, status) in &report.subsystem_status {
        let _ = writeln!(
            out,
            "autopilot_subsystem_status{{subsystem=\"{}\",status=\"{}\"}} 1",
            escape_label(subsystem.as_str()),
            escape_label(status.as_str())
        );
    }

    out.push_str("# HELP autopilot_rule_hits_total Times each coordination rule fired.\n");
    out.push_str("# TYPE autopilot_rule_hits_total counter\n");
    for (rule, hits) in &report.rule_hit_counts {
        let _ = writeln!(
            out,
            "autopilot_rule_hits_total{{rule=\"{}\"}} {hits}",
            escape_label(rule)
        );
    }

    out
}

/// Escape a label value: backslash, double quote and newline.
fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}
