//! One action routine per step type.
//!
//! Every routine is a chain of suspension points: timed waits that end early
//! with [`StepError::Cancelled`] when the step token trips. Progress is
//! reported as a fraction in `[0, 1]` of the step.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::Timing;
use crate::sequence::{
    CalibrationSettings, CaptureSettings, FilterSettings, FocusMode, FocusSettings, SlewSettings,
    Step, StepSettings,
};

use super::error::StepError;
use super::instrument::{DeviceAction, Instrument};

const SLEW_SHARE: f64 = 0.6;
const SOLVE_SHARE: f64 = 0.85;
const MIN_CENTER_PASSES: u32 = 2;
const MAX_CENTER_PASSES: u32 = 3;

pub type ProgressFn<'a> = &'a mut (dyn FnMut(f64) + Send);

pub struct Dispatcher<I> {
    instrument: I,
    timing: Timing,
    focuser: AtomicI32,
}

impl<I: Instrument> Dispatcher<I> {
    pub fn new(instrument: I, timing: Timing, focuser_start: i32) -> Self {
        Self {
            instrument,
            timing,
            focuser: AtomicI32::new(focuser_start),
        }
    }

    #[cfg(test)]
    pub fn instrument(&self) -> &I {
        &self.instrument
    }

    pub fn focuser_position(&self) -> i32 {
        self.focuser.load(Ordering::SeqCst)
    }

    pub async fn run(
        &self,
        step: &Step,
        token: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<(), StepError> {
        step.settings.validate().map_err(StepError::Invalid)?;

        match &step.settings {
            StepSettings::Capture(s) => self.capture(s, token, progress).await,
            StepSettings::Filter(s) => self.filter(s, token, progress).await,
            StepSettings::Focus(s) => self.focus(s, token, progress).await,
            StepSettings::Slew(s) => self.slew(s, token, progress).await,
            StepSettings::Wait(s) => self.timed(token, s.delay, |f| progress(f)).await,
            StepSettings::Calibration(s) => self.calibration(s, token, progress).await,
            StepSettings::Dither(s) => {
                self.dither(s.pixels, s.settle, token).await?;
                progress(1.0);
                Ok(())
            }
        }
    }

    async fn capture(
        &self,
        s: &CaptureSettings,
        token: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<(), StepError> {
        if let Some(filter) = &s.filter {
            self.instrument.begin(&DeviceAction::FilterChange { filter });
            pause_for(token, self.timing.filter_move).await?;
        }

        let count = s.count;
        for frame in 0..count {
            self.instrument.begin(&DeviceAction::Exposure {
                frame,
                count,
                exposure: s.exposure,
            });
            self.timed(token, s.exposure, |f| {
                progress((f64::from(frame) + f) / f64::from(count))
            })
            .await?;

            if s.dither && frame + 1 < count {
                self.dither(s.dither_pixels, s.dither_settle, token).await?;
            }
        }
        Ok(())
    }

    async fn calibration(
        &self,
        s: &CalibrationSettings,
        token: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<(), StepError> {
        let count = s.count;
        for index in 0..count {
            self.instrument.begin(&DeviceAction::CalibrationFrame {
                frame: s.frame,
                index,
                count,
            });
            self.timed(token, s.exposure, |f| {
                progress((f64::from(index) + f) / f64::from(count))
            })
            .await?;
        }
        Ok(())
    }

    async fn dither(
        &self,
        pixels: f64,
        settle: Duration,
        token: &CancellationToken,
    ) -> Result<(), StepError> {
        self.instrument.begin(&DeviceAction::Dither { pixels });
        pause_for(token, settle).await
    }

    async fn filter(
        &self,
        s: &FilterSettings,
        token: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<(), StepError> {
        self.instrument.begin(&DeviceAction::FilterChange { filter: &s.filter });
        pause_for(token, self.timing.filter_move).await?;
        progress(0.5);
        pause_for(token, s.settle).await?;
        progress(1.0);
        Ok(())
    }

    async fn focus(
        &self,
        s: &FocusSettings,
        token: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<(), StepError> {
        let requested = s
            .position
            .ok_or_else(|| StepError::Invalid("focus position missing".into()));
        match s.mode {
            FocusMode::Auto => self.autofocus(s, token, progress).await,
            FocusMode::Manual => self.move_focuser(requested?, token, progress).await,
            FocusMode::Relative => {
                let target = self.focuser_position().saturating_add(requested?);
                self.move_focuser(target, token, progress).await
            }
        }
    }

    /// Hill-climbs from the start position: keeps going while the metric
    /// improves, turns around with half the step when it does not.
    async fn autofocus(
        &self,
        s: &FocusSettings,
        token: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<(), StepError> {
        let max = s.max_attempts;
        let mut step_size = i32::try_from(s.step_size).unwrap_or(i32::MAX).max(1);
        let mut direction = 1;
        let mut best = s.position.unwrap_or_else(|| self.focuser_position());
        let mut best_score = f64::INFINITY;

        for attempt in 1..=max {
            let candidate = if attempt == 1 {
                best
            } else {
                best.saturating_add(direction * step_size)
            };
            self.instrument.begin(&DeviceAction::FocusProbe {
                attempt,
                position: candidate,
            });
            pause_for(token, self.timing.focus_measure).await?;

            let score = self.instrument.focus_quality(candidate);
            log::debug!(
                "focus attempt {}/{}: position {} score {:.3}",
                attempt,
                max,
                candidate,
                score
            );
            if score < best_score {
                best = candidate;
                best_score = score;
            } else {
                direction = -direction;
                step_size = (step_size / 2).max(1);
            }
            progress(f64::from(attempt) / f64::from(max));
        }

        log::info!("Best focus at {} (score {:.3})", best, best_score);
        self.instrument.begin(&DeviceAction::FocuserMove { position: best });
        pause_for(token, self.timing.focus_ramp).await?;
        self.focuser.store(best, Ordering::SeqCst);
        Ok(())
    }

    async fn move_focuser(
        &self,
        target: i32,
        token: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<(), StepError> {
        self.instrument.begin(&DeviceAction::FocuserMove { position: target });
        self.timed(token, self.timing.focus_ramp, |f| progress(f)).await?;
        self.focuser.store(target, Ordering::SeqCst);
        Ok(())
    }

    async fn slew(
        &self,
        s: &SlewSettings,
        token: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<(), StepError> {
        self.instrument.begin(&DeviceAction::Slew {
            ra: s.ra,
            dec: s.dec,
        });
        self.timed(token, self.timing.slew, |f| progress(SLEW_SHARE * f))
            .await?;
        let mut reached = SLEW_SHARE;

        if s.plate_solve {
            self.instrument.begin(&DeviceAction::PlateSolve);
            self.timed(token, self.timing.plate_solve, |f| {
                progress(SLEW_SHARE * (1.0 - f) + SOLVE_SHARE * f)
            })
            .await?;
            self.instrument
                .plate_solve(s.ra, s.dec)
                .map_err(|e| StepError::Failed(format!("plate solve failed: {}", e)))?;
            reached = SOLVE_SHARE;
        }

        if s.center {
            let passes = s.center_passes.clamp(MIN_CENTER_PASSES, MAX_CENTER_PASSES);
            for pass in 1..=passes {
                self.instrument.begin(&DeviceAction::CenteringPass { pass });
                pause_for(token, self.timing.center_pass).await?;
                let t = f64::from(pass) / f64::from(passes);
                progress(reached * (1.0 - t) + t);
            }
        }

        progress(1.0);
        Ok(())
    }

    /// A wait of `total` that reports its elapsed fraction every tick.
    async fn timed(
        &self,
        token: &CancellationToken,
        total: Duration,
        mut report: impl FnMut(f64) + Send,
    ) -> Result<(), StepError> {
        if total.is_zero() {
            pause_for(token, Duration::ZERO).await?;
            report(1.0);
            return Ok(());
        }

        let tick = self.timing.tick.max(Duration::from_millis(1));
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            let slice = tick.min(total - elapsed);
            pause_for(token, slice).await?;
            elapsed += slice;
            report(elapsed.as_secs_f64() / total.as_secs_f64());
        }
        Ok(())
    }
}

/// Suspension point.
async fn pause_for(token: &CancellationToken, wait: Duration) -> Result<(), StepError> {
    if token.is_cancelled() {
        return Err(StepError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(StepError::Cancelled),
        _ = tokio::time::sleep(wait) => Ok(()),
    }
}
