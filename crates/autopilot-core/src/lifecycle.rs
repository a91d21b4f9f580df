//! Lifecycle contract between subsystems and the health supervisor.
//!
//! Every managed subsystem owns its status. The supervisor only reads it
//! and, on failure, calls `initialize()` again.

use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use tracing::debug;

use crate::types::{SubsystemId, SubsystemStatus};

/// Boxed future used at trait-object seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A subsystem whose lifecycle the supervisor drives.
pub trait Managed: Send + Sync {
    fn id(&self) -> SubsystemId;

    /// Current coarse status.
    fn status(&self) -> SubsystemStatus;

    /// Bring the subsystem to `Ready`. Called at startup and on recovery.
    fn initialize(&self) -> BoxFuture<'_, anyhow::Result<()>>;

    /// Orderly shutdown. Must not fail.
    fn shutdown(&self) -> BoxFuture<'_, ()>;
}

/// Status storage owned by a subsystem.
#[derive(Debug)]
pub struct StatusCell {
    id: SubsystemId,
    status: RwLock<SubsystemStatus>,
}

impl StatusCell {
    pub fn new(id: SubsystemId) -> Self {
        Self {
            id,
            status: RwLock::new(SubsystemStatus::NotFound),
        }
    }

    pub fn get(&self) -> SubsystemStatus {
        match self.status.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Set the status, returning the previous one.
    pub fn set(&self, status: SubsystemStatus) -> SubsystemStatus {
        let mut guard = match self.status.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let prev = *guard;
        *guard = status;
        if prev != status {
            debug!(subsystem = %self.id, from = %prev, to = %status, "subsystem status changed");
        }
        prev
    }
}
