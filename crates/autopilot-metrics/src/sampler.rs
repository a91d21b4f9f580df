//! Metric sampler: periodic resource measurement with trend classification.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use autopilot_core::{Clock, ResourceMetrics, Trend};

use crate::probe::ResourceProbe;

/// Default rise (percentage points) that marks a sample as increasing.
pub const DEFAULT_TREND_DELTA: f64 = 5.0;

/// Samples resource utilization and remembers the latest reading.
///
/// Only the sampler writes `latest`; everyone else gets a clone.
pub struct MetricSampler {
    probe: Arc<dyn ResourceProbe>,
    clock: Arc<dyn Clock>,
    trend_delta: f64,
    latest: RwLock<Option<ResourceMetrics>>,
}

impl MetricSampler {
    pub fn new(probe: Arc<dyn ResourceProbe>, clock: Arc<dyn Clock>) -> Self {
        Self {
            probe,
            clock,
            trend_delta: DEFAULT_TREND_DELTA,
            latest: RwLock::new(None),
        }
    }

    pub fn with_trend_delta(mut self, delta: f64) -> Self {
        self.trend_delta = delta;
        self
    }

    /// Take a new sample, classify its trend against the previous one,
    /// and make it the latest.
    pub async fn sample(&self) -> anyhow::Result<ResourceMetrics> {
        let reading = self.probe.read()?;
        let mut latest = self.latest.write().await;

        let trend = match latest.as_ref() {
            Some(prev) => classify_trend(prev, reading.cpu, reading.memory, self.trend_delta),
            None => Trend::Stable,
        };

        let metrics = ResourceMetrics {
            cpu: reading.cpu,
            memory: reading.memory,
            network: reading.network,
            data_store: reading.data_store,
            trend,
            sampled_at: self.clock.now_secs(),
        };

        debug!(
            cpu = metrics.cpu,
            memory = metrics.memory,
            network = metrics.network,
            data_store = metrics.data_store,
            trend = ?metrics.trend,
            "metrics sampled"
        );

        *latest = Some(metrics.clone());
        Ok(metrics)
    }

    /// The most recent sample, if any.
    pub async fn latest(&self) -> Option<ResourceMetrics> {
        self.latest.read().await.clone()
    }
}

fn classify_trend(prev: &ResourceMetrics, cpu: f64, memory: f64, delta: f64) -> Trend {
    if cpu - prev.cpu > delta || memory - prev.memory > delta {
        Trend::Increasing
    } else {
        Trend::Stable
    }
}
