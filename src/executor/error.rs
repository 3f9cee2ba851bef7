use thiserror::Error;

use super::RunReport;

/// Outcome of an action routine that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// A suspension point observed a tripped cancellation token.
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
    /// Settings the action routine cannot act on. Never retried.
    #[error("invalid step settings: {0}")]
    Invalid(String),
}

impl StepError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StepError::Failed(_))
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("step {index} ({step_id}) failed and aborted the sequence: {source}")]
    Escalated {
        index: usize,
        step_id: String,
        #[source]
        source: StepError,
        report: Box<RunReport>,
    },
    #[error("start index {start} is past the end of a {len}-step sequence")]
    InvalidStart { start: usize, len: usize },
}
