use std::collections::HashSet;

use crate::config::ExecutorConfig;
use crate::sequence::{OnFail, Step, StepKind};

use super::error::StepError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Run the same step again.
    Retry,
    /// Mark the step failed and continue with the next one.
    Skip,
    /// Stop the sequence.
    Abort,
}

/// Decides what happens after a step failure. Holds no run state.
#[derive(Debug, Clone)]
pub struct Policy {
    critical: HashSet<StepKind>,
}

impl Default for Policy {
    fn default() -> Self {
        Self::new(ExecutorConfig::default().critical)
    }
}

impl Policy {
    pub fn new(critical: HashSet<StepKind>) -> Self {
        Self { critical }
    }

    pub fn is_critical(&self, kind: StepKind) -> bool {
        self.critical.contains(&kind)
    }

    /// Critical step types abort on their first failure, before any retry
    /// budget is consulted.
    pub fn decide(&self, step: &Step, failure: &StepError) -> Decision {
        if !failure.is_retryable() {
            return Decision::Abort;
        }
        if self.is_critical(step.kind()) {
            return Decision::Abort;
        }
        if step.retry_count < step.retry_budget {
            return Decision::Retry;
        }
        match step.on_fail {
            OnFail::Abort => Decision::Abort,
            OnFail::Continue => Decision::Skip,
        }
    }
}
