//! autopilotd: the autopilot daemon.
//!
//! Assembles every subsystem into one coordination engine:
//! - Metric sampler + predictive feed
//! - Agent pool
//! - Deployment controller
//! - Health supervisor
//! - Rule engine
//! - Lifecycle reporter
//!
//! # Usage
//!
//! ```text
//! autopilot run --config autopilot.toml
//! autopilot deploy --env staging --config autopilot.toml
//! ```

pub mod engine;
pub mod stages;
pub mod ticker;

pub use engine::{Engine, EngineParts, Subsystems, deployment_controller};
pub use stages::PipelineStages;
pub use ticker::Ticker;
