use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::utils::de_duration;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepKind {
    Capture,
    Filter,
    Focus,
    Slew,
    Wait,
    Calibration,
    Dither,
}

impl StepKind {
    pub const ALL: [StepKind; 7] = [
        StepKind::Capture,
        StepKind::Filter,
        StepKind::Focus,
        StepKind::Slew,
        StepKind::Wait,
        StepKind::Calibration,
        StepKind::Dither,
    ];

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.to_string() == key)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFail {
    #[default]
    Continue,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureSettings {
    pub count: u32,
    #[serde(deserialize_with = "de_duration")]
    pub exposure: Duration,
    #[serde(default)]
    pub dither: bool,
    #[serde(default = "default_dither_settle", deserialize_with = "de_duration")]
    pub dither_settle: Duration,
    #[serde(default = "default_dither_pixels")]
    pub dither_pixels: f64,
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterSettings {
    pub filter: String,
    #[serde(default = "default_filter_settle", deserialize_with = "de_duration")]
    pub settle: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusMode {
    #[default]
    Auto,
    Manual,
    Relative,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FocusSettings {
    #[serde(default)]
    pub mode: FocusMode,
    /// Absolute target (manual), offset (relative) or search start (auto).
    #[serde(default)]
    pub position: Option<i32>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_step_size")]
    pub step_size: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlewSettings {
    /// Right ascension in hours.
    pub ra: f64,
    /// Declination in degrees.
    pub dec: f64,
    #[serde(default)]
    pub plate_solve: bool,
    #[serde(default)]
    pub center: bool,
    #[serde(default = "default_center_passes")]
    pub center_passes: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaitSettings {
    #[serde(deserialize_with = "de_duration")]
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CalibrationFrame {
    Dark,
    Flat,
    Bias,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalibrationSettings {
    pub frame: CalibrationFrame,
    pub count: u32,
    #[serde(default, deserialize_with = "de_duration")]
    pub exposure: Duration,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DitherSettings {
    #[serde(default = "default_dither_settle", deserialize_with = "de_duration")]
    pub settle: Duration,
    #[serde(default = "default_dither_pixels")]
    pub pixels: f64,
}

/// Type-specific payload; the variant is the step's type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum StepSettings {
    Capture(CaptureSettings),
    Filter(FilterSettings),
    Focus(FocusSettings),
    Slew(SlewSettings),
    Wait(WaitSettings),
    Calibration(CalibrationSettings),
    Dither(DitherSettings),
}

impl StepSettings {
    pub fn kind(&self) -> StepKind {
        match self {
            StepSettings::Capture(_) => StepKind::Capture,
            StepSettings::Filter(_) => StepKind::Filter,
            StepSettings::Focus(_) => StepKind::Focus,
            StepSettings::Slew(_) => StepKind::Slew,
            StepSettings::Wait(_) => StepKind::Wait,
            StepSettings::Calibration(_) => StepKind::Calibration,
            StepSettings::Dither(_) => StepKind::Dither,
        }
    }

    pub fn from_yaml(kind: StepKind, value: serde_yaml::Value) -> Result<Self, serde_yaml::Error> {
        Ok(match kind {
            StepKind::Capture => StepSettings::Capture(serde_yaml::from_value(value)?),
            StepKind::Filter => StepSettings::Filter(serde_yaml::from_value(value)?),
            StepKind::Focus => StepSettings::Focus(serde_yaml::from_value(value)?),
            StepKind::Slew => StepSettings::Slew(serde_yaml::from_value(value)?),
            StepKind::Wait => StepSettings::Wait(serde_yaml::from_value(value)?),
            StepKind::Calibration => StepSettings::Calibration(serde_yaml::from_value(value)?),
            StepKind::Dither => StepSettings::Dither(serde_yaml::from_value(value)?),
        })
    }

    /// Checks the invariants an action routine relies on.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StepSettings::Capture(s) if s.count == 0 => {
                Err("capture count must be at least 1".into())
            }
            StepSettings::Calibration(s) if s.count == 0 => {
                Err("calibration count must be at least 1".into())
            }
            StepSettings::Filter(s) if s.filter.trim().is_empty() => {
                Err("filter name must not be empty".into())
            }
            StepSettings::Focus(s) => {
                if s.mode == FocusMode::Auto && s.max_attempts == 0 {
                    return Err("auto focus needs max_attempts of at least 1".into());
                }
                if s.mode != FocusMode::Auto && s.position.is_none() {
                    return Err("manual and relative focus need a position".into());
                }
                Ok(())
            }
            StepSettings::Slew(s) => {
                if !(0.0..24.0).contains(&s.ra) {
                    return Err(format!("ra {} out of range [0, 24)", s.ra));
                }
                if !(-90.0..=90.0).contains(&s.dec) {
                    return Err(format!("dec {} out of range [-90, 90]", s.dec));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub id: String,
    pub name: Option<String>,
    pub settings: StepSettings,
    /// Planned duration, used to weight overall progress.
    pub duration: Duration,
    pub enabled: bool,
    pub retry_budget: u32,
    pub on_fail: OnFail,

    pub status: StepStatus,
    pub progress: f64,
    pub retry_count: u32,
    pub error: Option<String>,
}

impl Step {
    pub fn new(id: impl Into<String>, settings: StepSettings, duration: Duration) -> Self {
        Self {
            id: id.into(),
            name: None,
            settings,
            duration,
            enabled: true,
            retry_budget: 0,
            on_fail: OnFail::default(),
            status: StepStatus::Pending,
            progress: 0.0,
            retry_count: 0,
            error: None,
        }
    }

    pub fn with_retries(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    pub fn with_on_fail(mut self, on_fail: OnFail) -> Self {
        self.on_fail = on_fail;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn kind(&self) -> StepKind {
        self.settings.kind()
    }

    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Clears run-time fields before a new run.
    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.progress = 0.0;
        self.retry_count = 0;
        self.error = None;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sequence {
    pub name: Option<String>,
    pub steps: Vec<Step>,
}

impl Sequence {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { name: None, steps }
    }

    pub fn planned_duration(&self) -> Duration {
        self.steps
            .iter()
            .fold(Duration::ZERO, |total, s| total.saturating_add(s.duration))
    }
}

fn default_dither_settle() -> Duration {
    Duration::from_secs(5)
}

fn default_dither_pixels() -> f64 {
    5.0
}

fn default_filter_settle() -> Duration {
    Duration::from_secs(1)
}

fn default_max_attempts() -> u32 {
    10
}

fn default_step_size() -> u32 {
    50
}

fn default_center_passes() -> u32 {
    3
}
