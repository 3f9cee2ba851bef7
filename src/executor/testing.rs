//! Test doubles shared by the executor tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use super::context::ExecutionHooks;
use super::instrument::{DeviceAction, Instrument};
use crate::sequence::Step;

pub struct ScriptedRig {
    best_focus: i32,
    failing_solves: AtomicU32,
    actions: Mutex<Vec<&'static str>>,
}

impl ScriptedRig {
    pub fn new(best_focus: i32) -> Self {
        Self {
            best_focus,
            failing_solves: AtomicU32::new(0),
            actions: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_next_solves(&self, n: u32) {
        self.failing_solves.store(n, Ordering::SeqCst);
    }

    pub fn actions(&self) -> Vec<&'static str> {
        self.actions.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.actions
            .lock()
            .unwrap()
            .iter()
            .filter(|a| **a == name)
            .count()
    }
}

impl Instrument for ScriptedRig {
    fn begin(&self, action: &DeviceAction<'_>) {
        self.actions.lock().unwrap().push(action.name());
    }

    fn focus_quality(&self, position: i32) -> f64 {
        (f64::from(position) - f64::from(self.best_focus)).abs()
    }

    fn plate_solve(&self, _ra: f64, _dec: f64) -> Result<(), String> {
        let failed = self
            .failing_solves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err("scripted failure".into())
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StepStart(String),
    StepProgress(String, f64),
    StepComplete(String, bool, Option<String>),
    SequenceComplete(bool),
    Log(String, log::Level),
    Overall(f64),
}

#[derive(Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<Event>>,
}

impl RecordingHooks {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::StepStart(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn completions(&self) -> Vec<(String, bool, Option<String>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::StepComplete(id, ok, err) => Some((id, ok, err)),
                _ => None,
            })
            .collect()
    }

    pub fn sequence_completions(&self) -> Vec<bool> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::SequenceComplete(ok) => Some(ok),
                _ => None,
            })
            .collect()
    }

    pub fn overall(&self) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Overall(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn logs(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Log(m, _) => Some(m),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl ExecutionHooks for RecordingHooks {
    fn on_step_start(&self, step: &Step) {
        self.push(Event::StepStart(step.id.clone()));
    }

    fn on_step_progress(&self, step_id: &str, percent: f64) {
        self.push(Event::StepProgress(step_id.to_string(), percent));
    }

    fn on_step_complete(&self, step_id: &str, success: bool, error: Option<&str>) {
        self.push(Event::StepComplete(
            step_id.to_string(),
            success,
            error.map(String::from),
        ));
    }

    fn on_sequence_complete(&self, success: bool) {
        self.push(Event::SequenceComplete(success));
    }

    fn on_log(&self, message: &str, level: log::Level) {
        self.push(Event::Log(message.to_string(), level));
    }

    fn on_overall_progress(&self, percent: f64) {
        self.push(Event::Overall(percent));
    }
}
