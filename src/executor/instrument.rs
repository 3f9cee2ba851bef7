use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::config::SimulatorConfig;
use crate::sequence::CalibrationFrame;

/// A device action about to start. Timing is owned by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceAction<'a> {
    Exposure {
        frame: u32,
        count: u32,
        exposure: Duration,
    },
    CalibrationFrame {
        frame: CalibrationFrame,
        index: u32,
        count: u32,
    },
    Dither {
        pixels: f64,
    },
    FilterChange {
        filter: &'a str,
    },
    FocusProbe {
        attempt: u32,
        position: i32,
    },
    FocuserMove {
        position: i32,
    },
    Slew {
        ra: f64,
        dec: f64,
    },
    PlateSolve,
    CenteringPass {
        pass: u32,
    },
}

impl DeviceAction<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceAction::Exposure { .. } => "exposure",
            DeviceAction::CalibrationFrame { .. } => "calibration",
            DeviceAction::Dither { .. } => "dither",
            DeviceAction::FilterChange { .. } => "filter",
            DeviceAction::FocusProbe { .. } => "focus_probe",
            DeviceAction::FocuserMove { .. } => "focuser_move",
            DeviceAction::Slew { .. } => "slew",
            DeviceAction::PlateSolve => "plate_solve",
            DeviceAction::CenteringPass { .. } => "centering",
        }
    }
}

impl fmt::Display for DeviceAction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceAction::Exposure {
                frame,
                count,
                exposure,
            } => write!(
                f,
                "exposure {}/{} ({})",
                frame + 1,
                count,
                humantime::format_duration(*exposure)
            ),
            DeviceAction::CalibrationFrame { frame, index, count } => {
                write!(f, "{} frame {}/{}", frame, index + 1, count)
            }
            DeviceAction::Dither { pixels } => write!(f, "dither {:.1}px", pixels),
            DeviceAction::FilterChange { filter } => write!(f, "filter -> {}", filter),
            DeviceAction::FocusProbe { attempt, position } => {
                write!(f, "focus probe #{} at {}", attempt, position)
            }
            DeviceAction::FocuserMove { position } => write!(f, "focuser -> {}", position),
            DeviceAction::Slew { ra, dec } => write!(f, "slew to ra={:.4}h dec={:.3}°", ra, dec),
            DeviceAction::PlateSolve => write!(f, "plate solve"),
            DeviceAction::CenteringPass { pass } => write!(f, "centering pass {}", pass),
        }
    }
}

/// Hardware-facing primitives behind the step actions.
pub trait Instrument: Send + Sync {
    fn begin(&self, action: &DeviceAction<'_>);

    /// Star-size style focus metric at `position`; lower is better.
    fn focus_quality(&self, position: i32) -> f64;

    fn plate_solve(&self, ra: f64, dec: f64) -> Result<(), String>;
}

/// Deterministic stand-in for a mount, camera, wheel and focuser.
#[derive(Debug)]
pub struct SimulatedRig {
    best_focus: i32,
    solve_failures_left: AtomicU32,
}

impl SimulatedRig {
    pub fn new(config: &SimulatorConfig) -> Self {
        Self {
            best_focus: config.best_focus,
            solve_failures_left: AtomicU32::new(config.plate_solve_failures),
        }
    }
}

impl Default for SimulatedRig {
    fn default() -> Self {
        Self::new(&SimulatorConfig::default())
    }
}

impl Instrument for SimulatedRig {
    fn begin(&self, action: &DeviceAction<'_>) {
        log::debug!("{}", action);
    }

    fn focus_quality(&self, position: i32) -> f64 {
        let offset = f64::from(position) - f64::from(self.best_focus);
        1.8 + (offset / 100.0).powi(2)
    }

    fn plate_solve(&self, ra: f64, dec: f64) -> Result<(), String> {
        let failed = self
            .solve_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(format!("no solution near ra={:.3}h dec={:.2}°", ra, dec));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn focus_quality_is_minimal_at_best_focus() {
        let rig = SimulatedRig::default();
        let best = rig.focus_quality(5150);
        assert!(rig.focus_quality(5100) > best);
        assert!(rig.focus_quality(5300) > rig.focus_quality(5200));
    }

    #[test]
    fn focus_quality_handles_extreme_positions() {
        let rig = SimulatedRig::default();
        assert!(rig.focus_quality(i32::MIN + 10).is_finite());
        assert!(rig.focus_quality(i32::MAX) > rig.focus_quality(5150));
    }

    #[test]
    fn actions_render_for_logs() {
        let action = DeviceAction::Exposure {
            frame: 0,
            count: 3,
            exposure: std::time::Duration::from_secs(90),
        };
        assert_eq!(action.to_string(), "exposure 1/3 (1m 30s)");
        assert_eq!(action.name(), "exposure");
    }

    #[test]
    fn configured_plate_solve_failures_are_consumed_in_order() {
        let rig = SimulatedRig::new(&SimulatorConfig {
            plate_solve_failures: 2,
            ..SimulatorConfig::default()
        });
        assert!(rig.plate_solve(1.0, 2.0).is_err());
        assert!(rig.plate_solve(1.0, 2.0).is_err());
        assert!(rig.plate_solve(1.0, 2.0).is_ok());
    }
}
