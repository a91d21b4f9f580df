//! autopilot-core: shared vocabulary for the coordination engine.
//!
//! Holds the domain types every subsystem exchanges (metrics, predictions,
//! agents, subsystem statuses, the per-tick `Snapshot`), the `Managed`
//! lifecycle trait the health supervisor drives, an injectable `Clock`,
//! and the `autopilot.toml` configuration.

pub mod clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock, epoch_secs, system_clock};
pub use config::{EngineConfig, EnvironmentDescriptor, parse_duration};
pub use error::{ConfigError, ConfigResult};
pub use lifecycle::{BoxFuture, Managed, StatusCell};
pub use types::*;
