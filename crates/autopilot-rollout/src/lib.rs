//! autopilot-rollout: staged deployment runs.
//!
//! # Pipeline
//!
//! ```text
//! begin(env) ──► Pending
//!     │
//! execute(handle)
//!     ├── notify(started)
//!     ├── Validate ─► Build ─► Migrate ─► Deploy ─► Verify
//!     │                          │ (failure = warning)
//!     │   any other failure ─────┴──► Failed + notify(rollback)
//!     └── all passed ──► Monitor, Success + notify(success)
//! ```
//!
//! Stages are executed by a `StageExecutor` (shell commands in production)
//! and notifications go through a `Notifier` (JSON webhook). A second
//! `begin` for an environment with a pending run is rejected, never queued.

pub mod controller;
pub mod error;
pub mod notify;
pub mod stage;

pub use controller::{DeploymentController, DeploymentRun, RunHandle, RunResult};
pub use error::{DeployError, DeployResult};
pub use notify::{DeploymentEvent, EventStatus, Notifier, WebhookNotifier, post_json};
pub use stage::{CommandStages, DeploymentStage, StageExecutor, StageOutcome};
