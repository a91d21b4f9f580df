//! autopilot-metrics: resource sampling and predictive signals.
//!
//! # Architecture
//!
//! ```text
//! MetricSampler
//!   ├── ResourceProbe (SystemProbe via sysinfo, ScriptedProbe for tests)
//!   └── sample() → ResourceMetrics { cpu, memory, network, data_store, trend }
//!
//! PredictiveFeed
//!   ├── ingest() ← latest sample, once per predictive tick
//!   ├── history window (bounded)
//!   └── predict_all() → { load, deployment_likelihood, resource }
//!         └── dyn SignalProvider (MovingAverageProvider, DisabledProvider)
//! ```
//!
//! Trend is `Increasing` when CPU or memory rose by more than the
//! configured delta since the previous sample, `Stable` otherwise.

pub mod feed;
pub mod probe;
pub mod sampler;
pub mod signals;

pub use feed::PredictiveFeed;
pub use probe::{ResourceProbe, ResourceReading, ScriptedProbe, SystemProbe};
pub use sampler::MetricSampler;
pub use signals::{DisabledProvider, MovingAverageProvider, SignalProvider};
