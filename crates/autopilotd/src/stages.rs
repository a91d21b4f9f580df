//! Stage executor used by the daemon.

use std::time::Duration;

use tracing::debug;

use autopilot_core::config::StageCommands;
use autopilot_core::{BoxFuture, Environment, EnvironmentDescriptor};
use autopilot_health::http_probe;
use autopilot_rollout::{CommandStages, DeploymentStage, StageExecutor, StageOutcome};

/// Shell commands per stage, with `Verify` falling back to the
/// environment's health check when no verify command is configured.
pub struct PipelineStages {
    commands: CommandStages,
    probe_timeout: Duration,
}

impl PipelineStages {
    pub fn new(commands: StageCommands, probe_timeout: Duration) -> Self {
        Self {
            commands: CommandStages::new(commands),
            probe_timeout,
        }
    }
}

impl StageExecutor for PipelineStages {
    fn execute<'a>(
        &'a self,
        stage: DeploymentStage,
        env: Environment,
        descriptor: &'a EnvironmentDescriptor,
    ) -> BoxFuture<'a, StageOutcome> {
        if stage != DeploymentStage::Verify || self.commands.command_for(stage).is_some() {
            return self.commands.execute(stage, env, descriptor);
        }
        Box::pin(async move {
            let Some(url) = descriptor.health_check_url.as_deref() else {
                debug!(%env, "no verify command or health check, verify skipped");
                return StageOutcome::ok("no verification configured");
            };
            let result = http_probe(url, self.probe_timeout).await;
            if result.is_healthy() {
                StageOutcome::ok(format!("health check {url} passed"))
            } else {
                StageOutcome::failed(format!("health check {url} {result}"))
            }
        })
    }
}
