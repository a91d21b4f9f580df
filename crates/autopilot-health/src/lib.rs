//! autopilot-health: subsystem supervision and health probes.
//!
//! # Architecture
//!
//! ```text
//! HealthSupervisor
//!   ├── registered dyn Managed subsystems (pool, deployment, predictive feed)
//!   │   ├── refresh() → status map for the Snapshot
//!   │   └── tick()    → recover() every Failed subsystem, once per tick
//!   ├── agent probes → flagged agents → read by the isolation rule
//!   └── environment probes
//!       └── http_probe() → ProbeResult (5s timeout by default)
//! ```
//!
//! A subsystem is `Failed` only when it says so. Recovery re-runs its
//! `initialize()`; a failed attempt leaves it `Failed` until the next tick.

pub mod checker;
pub mod supervisor;

pub use checker::{ProbeResult, http_probe};
pub use supervisor::{EnvironmentHealth, HealthSupervisor, HealthTick};
