//! Lifecycle report assembly and emission.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use autopilot_core::{Clock, ResourceMetrics, Snapshot, SubsystemId, SubsystemStatus};

use crate::sink::ReportSink;

/// Point-in-time view of the engine, written to the sink only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleReport {
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    pub subsystem_status: BTreeMap<SubsystemId, SubsystemStatus>,
    pub rule_hit_counts: BTreeMap<String, u64>,
    /// Agents that are not stopped.
    pub agent_pool_size: u32,
    pub uptime_secs: u64,
    pub metrics: ResourceMetrics,
}

/// Builds reports from engine state and hands them to a sink.
pub struct LifecycleReporter {
    sink: Arc<dyn ReportSink>,
    clock: Arc<dyn Clock>,
    started_at: u64,
}

impl LifecycleReporter {
    pub fn new(sink: Arc<dyn ReportSink>, clock: Arc<dyn Clock>) -> Self {
        let started_at = clock.now_secs();
        Self {
            sink,
            clock,
            started_at,
        }
    }

    /// Assemble a report. Reads only; nothing passed in is modified.
    pub fn assemble(&self, snapshot: &Snapshot, rule_hit_counts: BTreeMap<String, u64>) -> LifecycleReport {
        let timestamp = self.clock.now_secs();
        LifecycleReport {
            timestamp,
            subsystem_status: snapshot.subsystem_status.clone(),
            rule_hit_counts,
            agent_pool_size: snapshot.pool.total,
            uptime_secs: timestamp.saturating_sub(self.started_at),
            metrics: snapshot.metrics.clone(),
        }
    }

    /// Write a report. Sink failures are logged and dropped.
    pub async fn emit(&self, report: &LifecycleReport) {
        if let Err(e) = self.sink.write(report).await {
            warn!(sink = self.sink.name(), error = %e, "lifecycle report not written");
        }
    }
}
