//! Pipeline stages and the collaborators that execute them.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use autopilot_core::config::StageCommands;
use autopilot_core::{BoxFuture, Environment, EnvironmentDescriptor};

/// A stage of the deployment pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStage {
    Validate,
    /// Build and test.
    Build,
    Migrate,
    Deploy,
    Verify,
    /// Entered only after a successful verify; terminal.
    Monitor,
}

impl DeploymentStage {
    /// Stages delegated to an executor, in order.
    pub const EXECUTED: [DeploymentStage; 5] = [
        DeploymentStage::Validate,
        DeploymentStage::Build,
        DeploymentStage::Migrate,
        DeploymentStage::Deploy,
        DeploymentStage::Verify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStage::Validate => "validate",
            DeploymentStage::Build => "build",
            DeploymentStage::Migrate => "migrate",
            DeploymentStage::Deploy => "deploy",
            DeploymentStage::Verify => "verify",
            DeploymentStage::Monitor => "monitor",
        }
    }

    /// Whether a failure of this stage aborts the run.
    pub fn is_fatal(&self) -> bool {
        *self != DeploymentStage::Migrate
    }
}

impl fmt::Display for DeploymentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of executing one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub success: bool,
    pub message: String,
}

impl StageOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Executes pipeline stages. The controller does not care how.
pub trait StageExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        stage: DeploymentStage,
        env: Environment,
        descriptor: &'a EnvironmentDescriptor,
    ) -> BoxFuture<'a, StageOutcome>;
}

/// Runs the shell command configured for each stage.
///
/// The command sees `AUTOPILOT_ENV`, `AUTOPILOT_BASE_URL` and
/// `AUTOPILOT_STAGE`. Exit status 0 is success. A stage with no command
/// succeeds without doing anything. A command still running after
/// `stages.timeout` is killed and the stage fails.
pub struct CommandStages {
    commands: StageCommands,
    timeout: Duration,
}

impl CommandStages {
    pub fn new(commands: StageCommands) -> Self {
        let timeout = commands.command_timeout();
        Self { commands, timeout }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn command_for(&self, stage: DeploymentStage) -> Option<&str> {
        match stage {
            DeploymentStage::Validate => self.commands.validate.as_deref(),
            DeploymentStage::Build => self.commands.build.as_deref(),
            DeploymentStage::Migrate => self.commands.migrate.as_deref(),
            DeploymentStage::Deploy => self.commands.deploy.as_deref(),
            DeploymentStage::Verify => self.commands.verify.as_deref(),
            DeploymentStage::Monitor => None,
        }
    }
}

impl StageExecutor for CommandStages {
    fn execute<'a>(
        &'a self,
        stage: DeploymentStage,
        env: Environment,
        descriptor: &'a EnvironmentDescriptor,
    ) -> BoxFuture<'a, StageOutcome> {
        Box::pin(async move {
            let Some(command) = self.command_for(stage) else {
                debug!(%stage, %env, "no command configured, stage skipped");
                return StageOutcome::ok("no command configured");
            };

            info!(%stage, %env, %command, "running stage command");
            let child = Command::new("sh")
                .arg("-c")
                .arg(command)
                .env("AUTOPILOT_ENV", env.as_str())
                .env("AUTOPILOT_BASE_URL", &descriptor.base_url)
                .env("AUTOPILOT_STAGE", stage.as_str())
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output();

            let Ok(output) = tokio::time::timeout(self.timeout, child).await else {
                warn!(%stage, %env, timeout_ms = self.timeout.as_millis() as u64, "stage command timed out, killed");
                return StageOutcome::failed(format!("timed out after {:?}", self.timeout));
            };

            match output {
                Ok(out) if out.status.success() => {
                    StageOutcome::ok(last_line(&out.stdout).unwrap_or_else(|| "ok".to_string()))
                }
                Ok(out) => {
                    let detail = last_line(&out.stderr)
                        .or_else(|| last_line(&out.stdout))
                        .unwrap_or_default();
                    StageOutcome::failed(format!("{}: {detail}", out.status))
                }
                Err(e) => StageOutcome::failed(format!("failed to spawn command: {e}")),
            }
        })
    }
}

fn last_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
