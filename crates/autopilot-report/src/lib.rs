//! autopilot-report: periodic lifecycle reports.
//!
//! The reporter reads the latest snapshot and the rule hit counters,
//! builds an immutable `LifecycleReport`, and hands it to a `ReportSink`.
//! Nothing the reporter produces is read back by the engine, and a sink
//! that fails only costs that one report.

pub mod prometheus;
pub mod report;
pub mod sink;

pub use prometheus::render_prometheus;
pub use report::{LifecycleReport, LifecycleReporter};
pub use sink::{FanoutSink, JsonLinesSink, PrometheusFileSink, ReportSink, TracingSink};
