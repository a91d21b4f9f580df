//! Recurring task driver for the engine loops.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Shortest period a loop runs at; tokio rejects a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Runs a task every `interval` until shutdown.
///
/// Ticks never overlap. A tick that overruns makes the loop skip the
/// ticks it missed instead of queueing them. Shutdown abandons the
/// iteration in progress.
#[derive(Debug, Clone)]
pub struct Ticker {
    name: &'static str,
    interval: Duration,
}

impl Ticker {
    pub fn new(name: &'static str, interval: Duration) -> Self {
        if interval < MIN_INTERVAL {
            warn!(loop_name = name, ?interval, "interval below minimum, clamped");
        }
        Self {
            name,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Drive `task` until the shutdown flag flips. Returns the number of
    /// ticks started.
    pub async fn run<F, Fut>(&self, mut shutdown: watch::Receiver<bool>, mut task: F) -> u64
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut started = 0u64;

        info!(loop_name = self.name, interval_ms = self.interval.as_millis() as u64, "loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    started += 1;
                    tokio::select! {
                        _ = task() => {}
                        _ = shutdown.changed() => {
                            debug!(loop_name = self.name, "iteration abandoned for shutdown");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!(loop_name = self.name, ticks = started, "loop stopped");
        started
    }
}
