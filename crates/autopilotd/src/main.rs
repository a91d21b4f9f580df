//! autopilot: command-line entry point.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use autopilot_core::{EngineConfig, Environment};
use autopilot_rollout::RunResult;
use autopilotd::{Engine, deployment_controller};

#[derive(Parser)]
#[command(name = "autopilot", about = "Autonomous coordination engine")]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the coordination loops until interrupted.
    Run {
        /// Path to the configuration file.
        #[arg(long, default_value = "autopilot.toml")]
        config: PathBuf,
    },

    /// Run the deployment pipeline once for an environment.
    Deploy {
        /// Target environment.
        #[arg(long, value_enum)]
        env: CliEnvironment,

        /// Path to the configuration file.
        #[arg(long, default_value = "autopilot.toml")]
        config: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CliEnvironment {
    Staging,
    Production,
}

impl From<CliEnvironment> for Environment {
    fn from(env: CliEnvironment) -> Self {
        match env {
            CliEnvironment::Staging => Environment::Staging,
            CliEnvironment::Production => Environment::Production,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run { config } => run(&config).await,
        Command::Deploy { env, config } => deploy(env.into(), &config).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,autopilotd=debug,autopilot_rules=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(config_path: &Path) -> anyhow::Result<()> {
    let config = EngineConfig::from_file(config_path)?;
    info!(config = %config_path.display(), "autopilot starting");

    let engine = Arc::new(Engine::start(config).await?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    engine.run(shutdown_rx).await;
    info!("autopilot stopped");
    Ok(())
}

async fn deploy(env: Environment, config_path: &Path) -> anyhow::Result<()> {
    let config = EngineConfig::from_file(config_path)?;
    config.environment(env)?;

    let controller = deployment_controller(&config).await?;
    let run = controller.deploy(env).await?;

    for warning in &run.warnings {
        warn!(deployment_id = %run.id, %warning, "deployment warning");
    }
    match run.result {
        RunResult::Success => {
            info!(deployment_id = %run.id, %env, "deployment complete");
            Ok(())
        }
        _ => {
            let failure = run.failure.unwrap_or_else(|| "unknown failure".to_string());
            error!(deployment_id = %run.id, %env, %failure, "deployment failed");
            anyhow::bail!("deployment {} failed at {}", run.id, run.stage)
        }
    }
}
