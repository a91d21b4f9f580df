//! Signal providers: pluggable predictors over the metric history.
//!
//! Callers only ever hold a `dyn SignalProvider`, so a provider can be
//! swapped without touching the feed or the rule engine.

use autopilot_core::{Prediction, ResourceMetrics, SignalKind, Trend};

use crate::probe::clamp_pct;

/// Produces a prediction for a signal from recent metrics.
pub trait SignalProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Predict `kind` from `history` (oldest first).
    fn predict(&self, kind: SignalKind, history: &[ResourceMetrics]) -> Prediction;
}

/// The series a signal is computed from.
///
/// - load: CPU utilization
/// - resource: the tighter of memory and data-store usage
/// - deployment likelihood: 100 for samples whose trend was increasing, else 0
pub fn series(kind: SignalKind, history: &[ResourceMetrics]) -> Vec<f64> {
    history
        .iter()
        .map(|m| match kind {
            SignalKind::Load => m.cpu,
            SignalKind::Resource => m.memory.max(m.data_store),
            SignalKind::DeploymentLikelihood => {
                if m.trend == Trend::Increasing {
                    100.0
                } else {
                    0.0
                }
            }
        })
        .collect()
}

/// Deterministic moving-average predictor.
///
/// Over the last `window` samples:
/// - value = mean + per-sample slope, clamped to 0-100
/// - confidence = (100 - stddev) scaled by how full the window is
/// - trend = sign of the slope outside a dead band
#[derive(Debug, Clone)]
pub struct MovingAverageProvider {
    window: usize,
    dead_band: f64,
}

impl MovingAverageProvider {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            dead_band: 1.0,
        }
    }

    pub fn with_dead_band(mut self, dead_band: f64) -> Self {
        self.dead_band = dead_band.abs();
        self
    }
}

impl Default for MovingAverageProvider {
    fn default() -> Self {
        Self::new(10)
    }
}

impl SignalProvider for MovingAverageProvider {
    fn name(&self) -> &'static str {
        "moving_average"
    }

    fn predict(&self, kind: SignalKind, history: &[ResourceMetrics]) -> Prediction {
        let values = series(kind, history);
        let start = values.len().saturating_sub(self.window);
        let window = &values[start..];

        if window.is_empty() {
            return Prediction {
                value: 0.0,
                confidence: 0.0,
                trend: Trend::Stable,
            };
        }

        let n = window.len() as f64;
        let mean = window.iter().sum::<f64>() / n;
        let slope = if window.len() > 1 {
            (window[window.len() - 1] - window[0]) / (n - 1.0)
        } else {
            0.0
        };
        let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let fill = n / self.window as f64;
        let confidence = clamp_pct((100.0 - variance.sqrt()) * fill);

        let trend = if slope > self.dead_band {
            Trend::Increasing
        } else if slope < -self.dead_band {
            Trend::Decreasing
        } else {
            Trend::Stable
        };

        Prediction {
            value: clamp_pct(mean + slope),
            confidence,
            trend,
        }
    }
}

/// A provider that predicts nothing.
///
/// Stands in where no real model is configured; it never drives a rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledProvider;

impl SignalProvider for DisabledProvider {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn predict(&self, _kind: SignalKind, _history: &[ResourceMetrics]) -> Prediction {
        Prediction {
            value: 0.0,
            confidence: 0.0,
            trend: Trend::Stable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(cpu: f64, memory: f64, trend: Trend) -> ResourceMetrics {
        ResourceMetrics {
            cpu,
            memory,
            network: 0.0,
            data_store: 30.0,
            trend,
            sampled_at: 0,
        }
    }

    fn cpu_history(values: &[f64]) -> Vec<ResourceMetrics> {
        values.iter().map(|v| metrics(*v, 10.0, Trend::Stable)).collect()
    }

    #[test]
    fn empty_history_predicts_zero_confidence() {
        let p = MovingAverageProvider::new(5).predict(SignalKind::Load, &[]);
        assert_eq!(p.value, 0.0);
        assert_eq!(p.confidence, 0.0);
        assert_eq!(p.trend, Trend::Stable);
    }

    #[test]
    fn rising_load_projects_ahead() {
        let history = cpu_history(&[50.0, 60.0, 70.0]);
        let p = MovingAverageProvider::new(3).predict(SignalKind::Load, &history);
        // mean 60 + slope 10
        assert!((p.value - 70.0).abs() < 1e-9);
        assert_eq!(p.trend, Trend::Increasing);
    }

    #[test]
    fn falling_load_is_decreasing() {
        let history = cpu_history(&[70.0, 60.0, 50.0]);
        let p = MovingAverageProvider::new(3).predict(SignalKind::Load, &history);
        assert_eq!(p.trend, Trend::Decreasing);
    }

    #[test]
    fn flat_full_window_is_fully_confident() {
        let history = cpu_history(&[40.0, 40.0, 40.0, 40.0]);
        let p = MovingAverageProvider::new(4).predict(SignalKind::Load, &history);
        assert_eq!(p.confidence, 100.0);
        assert_eq!(p.trend, Trend::Stable);
    }

    #[test]
    fn partial_window_lowers_confidence() {
        let history = cpu_history(&[40.0, 40.0]);
        let p = MovingAverageProvider::new(4).predict(SignalKind::Load, &history);
        assert_eq!(p.confidence, 50.0);
    }

    #[test]
    fn only_the_window_is_considered() {
        let history = cpu_history(&[0.0, 0.0, 90.0, 90.0]);
        let p = MovingAverageProvider::new(2).predict(SignalKind::Load, &history);
        assert_eq!(p.value, 90.0);
    }

    #[test]
    fn prediction_is_deterministic() {
        let history = cpu_history(&[12.0, 37.0, 55.0, 41.0]);
        let provider = MovingAverageProvider::default();
        assert_eq!(
            provider.predict(SignalKind::Load, &history),
            provider.predict(SignalKind::Load, &history)
        );
    }

    #[test]
    fn resource_series_uses_tighter_of_memory_and_data_store() {
        let history = vec![metrics(0.0, 20.0, Trend::Stable), metrics(0.0, 95.0, Trend::Stable)];
        assert_eq!(series(SignalKind::Resource, &history), vec![30.0, 95.0]);
    }

    #[test]
    fn deployment_likelihood_counts_increasing_samples() {
        let history = vec![
            metrics(0.0, 0.0, Trend::Increasing),
            metrics(0.0, 0.0, Trend::Stable),
            metrics(0.0, 0.0, Trend::Increasing),
            metrics(0.0, 0.0, Trend::Increasing),
        ];
        let p = MovingAverageProvider::new(4)
            .with_dead_band(1000.0)
            .predict(SignalKind::DeploymentLikelihood, &history);
        assert_eq!(p.value, 75.0);
    }

    #[test]
    fn disabled_provider_never_predicts() {
        let history = cpu_history(&[99.0, 99.0]);
        let p = DisabledProvider.predict(SignalKind::Load, &history);
        assert_eq!(p.value, 0.0);
        assert_eq!(p.confidence, 0.0);
    }
}
