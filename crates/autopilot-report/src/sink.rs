//! Report sinks.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::info;

use autopilot_core::BoxFuture;

use crate::prometheus::render_prometheus;
use crate::report::LifecycleReport;

/// Destination for lifecycle reports. Writes are fire-and-forget from the
/// engine's point of view.
pub trait ReportSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn write<'a>(&'a self, report: &'a LifecycleReport) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Emits each report as a structured `tracing` event.
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn write<'a>(&'a self, report: &'a LifecycleReport) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let statuses = serde_json::to_string(&report.subsystem_status)?;
            let hits: u64 = report.rule_hit_counts.values().sum();
            info!(
                timestamp = report.timestamp,
                uptime_secs = report.uptime_secs,
                agent_pool_size = report.agent_pool_size,
                rule_hits = hits,
                cpu = report.metrics.cpu,
                memory = report.metrics.memory,
                subsystems = %statuses,
                "lifecycle report"
            );
            Ok(())
        })
    }
}

/// Appends one JSON object per line to a file.
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReportSink for JsonLinesSink {
    fn name(&self) -> &'static str {
        "json_lines"
    }

    fn write<'a>(&'a self, report: &'a LifecycleReport) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let mut line = serde_json::to_vec(report)?;
            line.push(b'\n');

            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(&line).await?;
            file.flush().await?;
            Ok(())
        })
    }
}

/// Rewrites a Prometheus text file with the latest report, for a
/// textfile collector to pick up.
pub struct PrometheusFileSink {
    path: PathBuf,
}

impl PrometheusFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReportSink for PrometheusFileSink {
    fn name(&self) -> &'static str {
        "prometheus_file"
    }

    fn write<'a>(&'a self, report: &'a LifecycleReport) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            // Write then rename so a scraper never reads a partial file.
            let tmp = self.path.with_extension("prom.tmp");
            tokio::fs::write(&tmp, render_prometheus(report)).await?;
            tokio::fs::rename(&tmp, &self.path).await?;
            Ok(())
        })
    }
}

/// Writes to every inner sink; fails if any of them failed.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn ReportSink>>) -> Self {
        Self { sinks }
    }
}

impl ReportSink for FanoutSink {
    fn name(&self) -> &'static str {
        "fanout"
    }

    fn write<'a>(&'a self, report: &'a LifecycleReport) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let mut failed = Vec::new();
            for sink in &self.sinks {
                if let Err(e) = sink.write(report).await {
                    failed.push(format!("{}: {e}", sink.name()));
                }
            }
            if !failed.is_empty() {
                anyhow::bail!("report sinks failed: {}", failed.join("; "));
            }
            Ok(())
        })
    }
}
