use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

use crate::sequence::utils::de_duration;
use crate::sequence::StepKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub timing: Timing,
    pub executor: ExecutorConfig,
    pub simulator: SimulatorConfig,
}

/// Durations of the simulated device primitives.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timing {
    #[serde(deserialize_with = "de_duration")]
    pub filter_move: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub focus_measure: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub focus_ramp: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub slew: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub plate_solve: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub center_pass: Duration,
    /// Granularity of progress reports inside long waits.
    #[serde(deserialize_with = "de_duration")]
    pub tick: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            filter_move: Duration::from_secs(2),
            focus_measure: Duration::from_secs(1),
            focus_ramp: Duration::from_secs(2),
            slew: Duration::from_secs(10),
            plate_solve: Duration::from_secs(3),
            center_pass: Duration::from_secs(2),
            tick: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Step types whose failure always aborts the run.
    pub critical: HashSet<StepKind>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            critical: HashSet::from([StepKind::Slew]),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub best_focus: i32,
    pub focuser_start: i32,
    /// Number of plate solves that fail before one succeeds.
    pub plate_solve_failures: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            best_focus: 5150,
            focuser_start: 5000,
            plate_solve_failures: 0,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn from_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }
}
