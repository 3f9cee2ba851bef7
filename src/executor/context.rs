use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::sequence::Sequence;

/// The only way state leaves the executor.
pub trait ExecutionHooks: Send + Sync {
    fn on_step_start(&self, step: &crate::sequence::Step);
    fn on_step_progress(&self, step_id: &str, percent: f64);
    fn on_step_complete(&self, step_id: &str, success: bool, error: Option<&str>);
    fn on_sequence_complete(&self, success: bool);
    fn on_log(&self, message: &str, level: log::Level);

    /// Duration-weighted progress of the whole run, in percent.
    fn on_overall_progress(&self, _percent: f64) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepRequest {
    Skip,
    Retry,
}

/// Host-owned run state. The executor reads it at step boundaries and never
/// writes to it.
#[derive(Debug)]
pub struct RunControl {
    paused: watch::Sender<bool>,
    abort: CancellationToken,
    request: Mutex<Option<StepRequest>>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            paused,
            abort: CancellationToken::new(),
            request: Mutex::new(None),
        }
    }

    pub fn request_pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn request_resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn request_abort(&self) {
        self.abort.cancel();
    }

    /// Takes effect once the host also calls `Executor::cancel_current_step`.
    pub fn request_skip(&self) {
        *self.request.lock().unwrap() = Some(StepRequest::Skip);
    }

    /// Takes effect once the host also calls `Executor::cancel_current_step`.
    pub fn request_retry(&self) {
        *self.request.lock().unwrap() = Some(StepRequest::Retry);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }

    pub(crate) fn take_request(&self) -> Option<StepRequest> {
        self.request.lock().unwrap().take()
    }

    pub(crate) async fn resumed(&self) {
        let mut rx = self.paused.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

/// Everything one run needs. Built fresh per run and consumed by it.
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub sequence: Sequence,
    pub start_index: usize,
    pub cancel: CancellationToken,
    pub hooks: Arc<dyn ExecutionHooks>,
    pub control: Arc<RunControl>,
}

impl ExecutionContext {
    pub fn new(sequence: Sequence, hooks: Arc<dyn ExecutionHooks>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            sequence,
            start_index: 0,
            cancel: CancellationToken::new(),
            hooks,
            control: Arc::new(RunControl::new()),
        }
    }

    pub fn starting_at(mut self, index: usize) -> Self {
        self.start_index = index;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_control(mut self, control: Arc<RunControl>) -> Self {
        self.control = control;
        self
    }
}
