//! autopilot.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::types::Environment;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: LoopConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub stages: StageCommands,
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentDescriptor>,
}

/// Tick intervals for the four engine loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub sample_interval: String,
    pub predict_interval: String,
    pub coordinate_interval: String,
    pub report_interval: String,
    /// Timeout for any outbound HTTP call (health checks, webhooks).
    pub http_timeout: String,
    /// Predictions below this confidence are hidden from rules. Unset = no gate.
    pub confidence_threshold: Option<f64>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            sample_interval: "30s".to_string(),
            predict_interval: "60s".to_string(),
            coordinate_interval: "30s".to_string(),
            report_interval: "60s".to_string(),
            http_timeout: "5s".to_string(),
            confidence_threshold: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub initial_size: u32,
    pub scale_factor: f64,
    pub max_agents: u32,
    pub idle_timeout: String,
    pub agent_kind: String,
    /// Per-agent health URL, `{id}` replaced with the agent id. Agents
    /// failing it are flagged for isolation. Unset = agents are not probed.
    pub health_check_url: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 4,
            scale_factor: 1.5,
            max_agents: 50,
            idle_timeout: "5m".to_string(),
            agent_kind: "worker".to_string(),
            health_check_url: None,
        }
    }
}

/// Rule trigger thresholds, all percentages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub cpu_high: f64,
    pub memory_high: f64,
    pub cpu_low: f64,
    pub predicted_load_high: f64,
    pub resource_pressure_high: f64,
    pub deploy_likelihood_high: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            cpu_high: 80.0,
            memory_high: 85.0,
            cpu_low: 30.0,
            predicted_load_high: 75.0,
            resource_pressure_high: 90.0,
            deploy_likelihood_high: 70.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Path whose backing volume stands in for the data store.
    pub data_path: String,
    /// Link capacity used to turn throughput into a percentage.
    pub network_capacity_mbps: u64,
    /// Rise (in percentage points) that classifies a sample as increasing.
    pub trend_delta: f64,
    /// Samples kept for prediction.
    pub history: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            data_path: "/".to_string(),
            network_capacity_mbps: 1000,
            trend_delta: 5.0,
            history: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReportConfig {
    /// Append JSON-lines reports here; logs only when unset.
    pub path: Option<String>,
    /// Rewrite a Prometheus textfile with each report.
    pub prometheus_path: Option<String>,
}

/// Shell commands for each deployment stage. Unset stages succeed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageCommands {
    pub validate: Option<String>,
    pub build: Option<String>,
    pub migrate: Option<String>,
    pub deploy: Option<String>,
    pub verify: Option<String>,
    /// Longest a single stage command may run before it is killed.
    pub timeout: String,
}

impl Default for StageCommands {
    fn default() -> Self {
        Self {
            validate: None,
            build: None,
            migrate: None,
            deploy: None,
            verify: None,
            timeout: "10m".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentDescriptor {
    pub base_url: String,
    pub webhook_url: Option<String>,
    pub health_check_url: Option<String>,
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        for (field, value) in [
            ("engine.sample_interval", &self.engine.sample_interval),
            ("engine.predict_interval", &self.engine.predict_interval),
            ("engine.coordinate_interval", &self.engine.coordinate_interval),
            ("engine.report_interval", &self.engine.report_interval),
            ("engine.http_timeout", &self.engine.http_timeout),
            ("pool.idle_timeout", &self.pool.idle_timeout),
            ("stages.timeout", &self.stages.timeout),
        ] {
            match parse_duration(value) {
                None => {
                    return Err(ConfigError::Invalid {
                        field: field.to_string(),
                        reason: format!("unparseable duration {value:?}"),
                    });
                }
                Some(d) if d.is_zero() => {
                    return Err(ConfigError::Invalid {
                        field: field.to_string(),
                        reason: "must be greater than zero".to_string(),
                    });
                }
                Some(_) => {}
            }
        }
        if self.pool.scale_factor < 1.0 {
            return Err(ConfigError::Invalid {
                field: "pool.scale_factor".to_string(),
                reason: "must be at least 1.0".to_string(),
            });
        }
        if let Some(threshold) = self.engine.confidence_threshold
            && !(0.0..=100.0).contains(&threshold)
        {
            return Err(ConfigError::Invalid {
                field: "engine.confidence_threshold".to_string(),
                reason: "must be within 0-100".to_string(),
            });
        }
        for name in self.environments.keys() {
            if name.parse::<Environment>().is_err() {
                return Err(ConfigError::UnknownEnvironment(name.clone()));
            }
        }
        Ok(())
    }

    /// Descriptor for an environment.
    pub fn environment(&self, env: Environment) -> ConfigResult<&EnvironmentDescriptor> {
        self.environments
            .get(env.as_str())
            .ok_or_else(|| ConfigError::MissingEnvironment(env.to_string()))
    }

    /// Every configured environment with its descriptor.
    pub fn configured_environments(&self) -> Vec<(Environment, EnvironmentDescriptor)> {
        self.environments
            .iter()
            .filter_map(|(name, desc)| name.parse().ok().map(|env| (env, desc.clone())))
            .collect()
    }

    pub fn sample_interval(&self) -> Duration {
        duration_or(&self.engine.sample_interval, Duration::from_secs(30))
    }

    pub fn predict_interval(&self) -> Duration {
        duration_or(&self.engine.predict_interval, Duration::from_secs(60))
    }

    pub fn coordinate_interval(&self) -> Duration {
        duration_or(&self.engine.coordinate_interval, Duration::from_secs(30))
    }

    pub fn report_interval(&self) -> Duration {
        duration_or(&self.engine.report_interval, Duration::from_secs(60))
    }

    pub fn http_timeout(&self) -> Duration {
        duration_or(&self.engine.http_timeout, Duration::from_secs(5))
    }

    pub fn idle_timeout(&self) -> Duration {
        duration_or(&self.pool.idle_timeout, Duration::from_secs(300))
    }

    pub fn stage_timeout(&self) -> Duration {
        self.stages.command_timeout()
    }
}

impl StageCommands {
    pub fn command_timeout(&self) -> Duration {
        duration_or(&self.timeout, Duration::from_secs(600))
    }
}

fn duration_or(s: &str, fallback: Duration) -> Duration {
    parse_duration(s).unwrap_or(fallback)
}

/// Parse a duration string like "5s", "500ms", "1m".
///
/// Values too large to represent are `None`.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
