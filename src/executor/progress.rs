use crate::sequence::Step;

/// Duration-weighted overall progress of one run, in percent.
///
/// Resolved steps (completed, failed or skipped) contribute their full planned
/// duration. The in-flight step contributes `duration * fraction`. The
/// reported value never goes down within one aggregator; a new run starts a
/// new aggregator.
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    weights: Vec<f64>,
    resolved: Vec<bool>,
    total: f64,
    done: f64,
    reported: f64,
}

impl ProgressAggregator {
    pub fn new(steps: &[Step]) -> Self {
        let mut weights: Vec<f64> = steps.iter().map(|s| s.duration.as_secs_f64()).collect();
        let mut total: f64 = weights.iter().sum();
        // Without planned durations every step weighs the same.
        if total <= 0.0 {
            weights.iter_mut().for_each(|w| *w = 1.0);
            total = weights.len() as f64;
        }

        Self {
            resolved: vec![false; weights.len()],
            weights,
            total,
            done: 0.0,
            reported: 0.0,
        }
    }

    /// Credits every step before `start` as already done (resume).
    pub fn resume_from(&mut self, start: usize) -> f64 {
        for index in 0..start.min(self.weights.len()) {
            self.resolve(index);
        }
        self.publish(0.0)
    }

    pub fn update(&mut self, index: usize, fraction: f64) -> f64 {
        let active = match self.resolved.get(index) {
            Some(false) => self.weights[index] * fraction.clamp(0.0, 1.0),
            _ => 0.0,
        };
        self.publish(active)
    }

    pub fn complete(&mut self, index: usize) -> f64 {
        self.resolve(index);
        self.publish(0.0)
    }

    /// Marks a run that walked every step as fully done.
    pub fn finish(&mut self) -> f64 {
        self.reported = 100.0;
        self.reported
    }

    pub fn overall(&self) -> f64 {
        self.reported
    }

    fn resolve(&mut self, index: usize) {
        if let Some(resolved) = self.resolved.get_mut(index) {
            if !*resolved {
                *resolved = true;
                self.done += self.weights[index];
            }
        }
    }

    fn publish(&mut self, active: f64) -> f64 {
        if self.total <= 0.0 {
            return self.reported;
        }
        let overall = ((self.done + active) / self.total).clamp(0.0, 1.0) * 100.0;
        self.reported = self.reported.max(overall);
        self.reported
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{StepSettings, WaitSettings};
    use std::time::Duration;

    fn steps(secs: &[u64]) -> Vec<Step> {
        secs.iter()
            .enumerate()
            .map(|(i, s)| {
                Step::new(
                    format!("s{i}"),
                    StepSettings::Wait(WaitSettings {
                        delay: Duration::from_secs(*s),
                    }),
                    Duration::from_secs(*s),
                )
            })
            .collect()
    }

    #[test]
    fn weights_by_planned_duration() {
        let mut agg = ProgressAggregator::new(&steps(&[30, 10]));
        assert_eq!(agg.update(0, 0.5), 37.5);
        assert_eq!(agg.complete(0), 75.0);
        assert_eq!(agg.update(1, 0.5), 87.5);
        assert_eq!(agg.complete(1), 100.0);
    }

    #[test]
    fn never_decreases_when_a_step_restarts() {
        let mut agg = ProgressAggregator::new(&steps(&[10, 10]));
        assert_eq!(agg.update(0, 0.8), 40.0);
        // retry starts the step over
        assert_eq!(agg.update(0, 0.1), 40.0);
        assert_eq!(agg.update(0, 0.9), 45.0);
    }

    #[test]
    fn resolving_twice_counts_once() {
        let mut agg = ProgressAggregator::new(&steps(&[10, 10]));
        agg.complete(0);
        assert_eq!(agg.complete(0), 50.0);
    }

    #[test]
    fn clamps_out_of_range_fractions() {
        let mut agg = ProgressAggregator::new(&steps(&[10]));
        assert_eq!(agg.update(0, 3.0), 100.0);
        assert_eq!(agg.update(0, -1.0), 100.0);
    }

    #[test]
    fn zero_durations_fall_back_to_equal_weights() {
        let mut agg = ProgressAggregator::new(&steps(&[0, 0, 0, 0]));
        assert_eq!(agg.complete(0), 25.0);
    }

    #[test]
    fn resume_credits_earlier_steps() {
        let mut agg = ProgressAggregator::new(&steps(&[20, 20, 60]));
        assert_eq!(agg.resume_from(2), 40.0);
    }

    #[test]
    fn empty_plan_reports_zero() {
        let mut agg = ProgressAggregator::new(&[]);
        assert_eq!(agg.update(0, 1.0), 0.0);
        assert_eq!(agg.finish(), 100.0);
    }
}
