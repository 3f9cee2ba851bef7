mod actions;
pub mod context;
mod error;
pub mod instrument;
mod policy;
mod progress;
#[cfg(test)]
mod testing;

use std::sync::{Arc, Mutex};

use log::Level;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::abort;
use crate::config::Config;
use crate::sequence::{Sequence, Step, StepStatus};

pub use actions::Dispatcher;
pub use context::{ExecutionContext, ExecutionHooks, RunControl, StepRequest};
pub use error::{ExecutorError, StepError};
pub use instrument::{Instrument, SimulatedRig};
pub use policy::{Decision, Policy};
pub use progress::ProgressAggregator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StepCounts {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StepCounts {
    pub fn resolved(&self) -> usize {
        self.completed + self.failed + self.skipped
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub counts: StepCounts,
    pub progress: f64,
    pub sequence: Sequence,
}

/// Runs one sequence at a time.
pub struct Executor<I> {
    dispatcher: Dispatcher<I>,
    policy: Policy,
    current_step: Mutex<Option<CancellationToken>>,
}

struct RunState {
    hooks: Arc<dyn ExecutionHooks>,
    progress: ProgressAggregator,
    counts: StepCounts,
}

impl RunState {
    fn log(&self, level: Level, message: String) {
        log::log!(level, "{}", message);
        self.hooks.on_log(&message, level);
    }

    fn resolve(
        &mut self,
        index: usize,
        step: &mut Step,
        status: StepStatus,
        error: Option<String>,
    ) {
        match status {
            StepStatus::Completed => {
                step.progress = 100.0;
                self.counts.completed += 1;
            }
            StepStatus::Failed => self.counts.failed += 1,
            StepStatus::Skipped => self.counts.skipped += 1,
            StepStatus::Pending | StepStatus::Running => {}
        }
        step.status = status;
        step.error = error;

        let overall = self.progress.complete(index);
        self.hooks.on_step_complete(
            &step.id,
            status == StepStatus::Completed,
            step.error.as_deref(),
        );
        self.hooks.on_overall_progress(overall);
    }

    fn report(&self, run_id: Uuid, status: RunStatus, sequence: Sequence) -> RunReport {
        RunReport {
            run_id,
            status,
            counts: self.counts,
            progress: self.progress.overall(),
            sequence,
        }
    }
}

impl<I: Instrument> Executor<I> {
    pub fn new(instrument: I, config: &Config) -> Self {
        Self {
            dispatcher: Dispatcher::new(
                instrument,
                config.timing.clone(),
                config.simulator.focuser_start,
            ),
            policy: Policy::new(config.executor.critical.clone()),
            current_step: Mutex::new(None),
        }
    }

    #[cfg(test)]
    pub fn instrument(&self) -> &I {
        self.dispatcher.instrument()
    }

    pub fn focuser_position(&self) -> i32 {
        self.dispatcher.focuser_position()
    }

    /// Interrupts the in-flight step, if any. The run itself carries on; the
    /// host's pending [`StepRequest`] decides whether the step is skipped or
    /// retried.
    pub fn cancel_current_step(&self) -> bool {
        match self.current_step.lock().unwrap().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn run(&self, ctx: ExecutionContext) -> Result<RunReport, ExecutorError> {
        let ExecutionContext {
            run_id,
            mut sequence,
            start_index,
            cancel,
            hooks,
            control,
        } = ctx;

        let len = sequence.steps.len();
        if start_index > len {
            return Err(ExecutorError::InvalidStart {
                start: start_index,
                len,
            });
        }
        for step in sequence.steps.iter_mut().skip(start_index) {
            step.reset();
        }

        let token = abort::combine([&cancel, control.abort_token()]);
        let mut state = RunState {
            hooks,
            progress: ProgressAggregator::new(&sequence.steps),
            counts: StepCounts::default(),
        };
        let initial = state.progress.resume_from(start_index);
        state.hooks.on_overall_progress(initial);

        state.log(
            Level::Info,
            format!(
                "Starting sequence {} ({} steps, planned {}) at step {}",
                sequence.name.as_deref().unwrap_or("<unnamed>"),
                len,
                humantime::format_duration(sequence.planned_duration()),
                start_index + 1
            ),
        );

        let mut started = false;
        let mut index = start_index;

        while index < len {
            if token.is_cancelled() {
                return Ok(self.abandon(state, started, run_id, sequence));
            }

            if control.is_paused() {
                state.log(
                    Level::Info,
                    format!("Sequence paused before step {}", index + 1),
                );
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {}
                    _ = control.resumed() => state.log(Level::Info, "Sequence resumed".into()),
                }
                continue;
            }

            let step = &mut sequence.steps[index];

            if !step.enabled {
                state.log(
                    Level::Info,
                    format!(
                        "Step {} ({}) is disabled, skipping its action",
                        index + 1,
                        step.label()
                    ),
                );
                state.hooks.on_step_progress(&step.id, 100.0);
                state.resolve(index, step, StepStatus::Completed, None);
                index += 1;
                continue;
            }

            step.status = StepStatus::Running;
            step.error = None;
            state.hooks.on_step_start(step);
            started = true;
            state.log(
                Level::Info,
                format!("Step {}/{}: {} ({})", index + 1, len, step.label(), step.kind()),
            );

            let step_token = token.token().child_token();
            *self.current_step.lock().unwrap() = Some(step_token.clone());

            let mut fraction = 0.0;
            let result = {
                let hooks = &state.hooks;
                let progress = &mut state.progress;
                let reached = &mut fraction;
                let id = step.id.as_str();
                let mut report = |f: f64| {
                    *reached = f;
                    hooks.on_step_progress(id, f * 100.0);
                    hooks.on_overall_progress(progress.update(index, f));
                };
                self.dispatcher.run(step, &step_token, &mut report).await
            };

            *self.current_step.lock().unwrap() = None;
            step.progress = fraction * 100.0;

            match result {
                Ok(()) => {
                    state.log(Level::Info, format!("Step {} completed", step.label()));
                    state.resolve(index, step, StepStatus::Completed, None);
                    index += 1;
                }
                Err(StepError::Cancelled) if token.is_cancelled() => {
                    state.resolve(index, step, StepStatus::Failed, Some("cancelled".into()));
                    return Ok(self.abandon(state, started, run_id, sequence));
                }
                Err(StepError::Cancelled) => match control.take_request() {
                    Some(StepRequest::Retry) => {
                        state.log(
                            Level::Warn,
                            format!("Step {} restarted by operator", step.label()),
                        );
                    }
                    Some(StepRequest::Skip) | None => {
                        state.log(
                            Level::Warn,
                            format!("Step {} skipped by operator", step.label()),
                        );
                        state.resolve(
                            index,
                            step,
                            StepStatus::Skipped,
                            Some("skipped by operator".into()),
                        );
                        index += 1;
                    }
                },
                Err(failure) => match self.policy.decide(step, &failure) {
                    Decision::Retry => {
                        step.retry_count += 1;
                        state.log(
                            Level::Warn,
                            format!(
                                "Step {} failed: {} (retry {}/{})",
                                step.label(),
                                failure,
                                step.retry_count,
                                step.retry_budget
                            ),
                        );
                    }
                    Decision::Skip => {
                        state.log(
                            Level::Error,
                            format!("Step {} failed: {}, continuing", step.label(), failure),
                        );
                        state.resolve(index, step, StepStatus::Failed, Some(failure.to_string()));
                        index += 1;
                    }
                    Decision::Abort => {
                        state.log(
                            Level::Error,
                            format!(
                                "Step {} failed: {}, aborting sequence",
                                step.label(),
                                failure
                            ),
                        );
                        state.resolve(index, step, StepStatus::Failed, Some(failure.to_string()));
                        let step_id = step.id.clone();
                        state.hooks.on_sequence_complete(false);
                        let report = state.report(run_id, RunStatus::Failed, sequence);
                        return Err(ExecutorError::Escalated {
                            index,
                            step_id,
                            source: failure,
                            report: Box::new(report),
                        });
                    }
                },
            }
        }

        let done = state.progress.finish();
        state.hooks.on_overall_progress(done);
        state.log(
            Level::Info,
            format!(
                "Sequence finished: {} completed, {} failed, {} skipped",
                state.counts.completed, state.counts.failed, state.counts.skipped
            ),
        );
        state.hooks.on_sequence_complete(true);
        Ok(state.report(run_id, RunStatus::Completed, sequence))
    }

    /// Cancellation before any step started ends the run silently; once a
    /// step has started the host is told the sequence did not succeed.
    fn abandon(
        &self,
        state: RunState,
        started: bool,
        run_id: Uuid,
        sequence: Sequence,
    ) -> RunReport {
        state.log(Level::Warn, "Sequence cancelled".into());
        if started {
            state.hooks.on_sequence_complete(false);
        }
        state.report(run_id, RunStatus::Aborted, sequence)
    }
}
