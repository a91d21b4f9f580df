//! Predictive feed: keeps the metric history and runs the signal providers.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use autopilot_core::{
    BoxFuture, Managed, Prediction, ResourceMetrics, SignalKind, StatusCell, SubsystemId,
    SubsystemStatus,
};

use crate::signals::{MovingAverageProvider, SignalProvider};

/// Owns the history window and one provider per signal.
///
/// Predictions are computed on every request from the current history;
/// nothing is cached between ticks.
pub struct PredictiveFeed {
    providers: BTreeMap<SignalKind, Arc<dyn SignalProvider>>,
    history: RwLock<VecDeque<ResourceMetrics>>,
    capacity: usize,
    status: StatusCell,
}

impl PredictiveFeed {
    /// A feed with a moving-average provider over `capacity` samples for
    /// every signal.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let provider: Arc<dyn SignalProvider> = Arc::new(MovingAverageProvider::new(capacity));
        let providers = SignalKind::ALL
            .iter()
            .map(|kind| (*kind, Arc::clone(&provider)))
            .collect();
        Self {
            providers,
            history: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            status: StatusCell::new(SubsystemId::PredictiveFeed),
        }
    }

    /// Replace the provider for one signal.
    pub fn with_provider(mut self, kind: SignalKind, provider: Arc<dyn SignalProvider>) -> Self {
        self.providers.insert(kind, provider);
        self
    }

    /// Append a sample to the history window.
    pub async fn ingest(&self, metrics: ResourceMetrics) {
        let mut history = self.history.write().await;
        history.push_back(metrics);
        while history.len() > self.capacity {
            history.pop_front();
        }
        if self.status.get() == SubsystemStatus::Ready {
            self.status.set(SubsystemStatus::Running);
        }
    }

    /// Predict a single signal.
    pub async fn predict(&self, kind: SignalKind) -> Option<Prediction> {
        if !self.is_serving() {
            return None;
        }
        let provider = self.providers.get(&kind)?;
        let history = self.history.read().await;
        let samples: Vec<ResourceMetrics> = history.iter().cloned().collect();
        Some(provider.predict(kind, &samples))
    }

    /// Predict every signal. Empty while the feed is failed or stopped.
    pub async fn predict_all(&self) -> BTreeMap<SignalKind, Prediction> {
        if !self.is_serving() {
            return BTreeMap::new();
        }
        let history = self.history.read().await;
        let samples: Vec<ResourceMetrics> = history.iter().cloned().collect();
        self.providers
            .iter()
            .map(|(kind, provider)| (*kind, provider.predict(*kind, &samples)))
            .collect()
    }

    pub async fn history_len(&self) -> usize {
        self.history.read().await.len()
    }

    /// Report that the feed can no longer produce predictions.
    pub fn fail(&self, reason: &str) {
        warn!(%reason, "predictive feed failed");
        self.status.set(SubsystemStatus::Failed);
    }

    fn is_serving(&self) -> bool {
        matches!(
            self.status.get(),
            SubsystemStatus::Ready | SubsystemStatus::Running | SubsystemStatus::Degraded
        )
    }
}

impl Managed for PredictiveFeed {
    fn id(&self) -> SubsystemId {
        SubsystemId::PredictiveFeed
    }

    fn status(&self) -> SubsystemStatus {
        self.status.get()
    }

    fn initialize(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.history.write().await.clear();
            self.status.set(SubsystemStatus::Ready);
            let providers: Vec<&str> = self.providers.values().map(|p| p.name()).collect();
            info!(capacity = self.capacity, ?providers, "predictive feed initialized");
            Ok(())
        })
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.status.set(SubsystemStatus::Stopped);
            info!("predictive feed stopped");
        })
    }
}
