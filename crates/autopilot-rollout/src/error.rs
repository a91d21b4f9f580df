//! Deployment controller error types.

use thiserror::Error;

use autopilot_core::{Environment, SubsystemStatus};

/// Errors returned when a deployment cannot be started or continued.
///
/// A stage failure is not an error: it produces a `Failed` run.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("deployment in progress for {0}")]
    InProgress(Environment),

    #[error("environment not configured: {0}")]
    UnknownEnvironment(Environment),

    #[error("deployment controller unavailable (status: {0})")]
    Unavailable(SubsystemStatus),

    #[error("no active run with id {0}")]
    NotActive(String),
}

pub type DeployResult<T> = Result<T, DeployError>;
