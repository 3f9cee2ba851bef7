use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::executor::{ExecutionHooks, RunReport, RunStatus, StepCounts};
use crate::sequence::Step;

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step_index: usize,
    pub step_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_type: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunLog {
    pub run_id: Option<Uuid>,
    pub status: Option<RunStatus>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: f64,
    pub counts: Option<StepCounts>,
    pub step_results: Vec<StepResult>,
}

impl Default for RunLog {
    fn default() -> Self {
        Self {
            run_id: None,
            status: None,
            started_at: Utc::now(),
            completed_at: None,
            progress: 0.0,
            counts: None,
            step_results: Vec::new(),
        }
    }
}

impl RunLog {
    pub fn finish(&mut self, report: &RunReport) {
        self.run_id = Some(report.run_id);
        self.status = Some(report.status);
        self.counts = Some(report.counts);
        self.progress = report.progress;
        self.completed_at = Some(Utc::now());
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    fn open(&mut self, step_id: &str, step_type: Option<String>) -> &mut StepResult {
        let existing = self
            .step_results
            .iter()
            .rposition(|r| r.step_id == step_id && r.completed_at.is_none());
        let index = match existing {
            Some(i) => i,
            None => {
                self.step_results.push(StepResult {
                    step_index: self.step_results.len(),
                    step_id: step_id.to_string(),
                    step_type,
                    started_at: Utc::now(),
                    completed_at: None,
                    attempts: 0,
                    success: false,
                    error: None,
                });
                self.step_results.len() - 1
            }
        };
        &mut self.step_results[index]
    }
}

/// Console observer for the CLI host. Tracks which step is current and keeps
/// a [`RunLog`]; with `json` set every event is also printed as one JSON line.
pub struct ReportingHooks {
    json: bool,
    log: Mutex<RunLog>,
    current: Mutex<Option<String>>,
    last_decile: Mutex<u32>,
}

impl ReportingHooks {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            log: Mutex::new(RunLog::default()),
            current: Mutex::new(None),
            last_decile: Mutex::new(0),
        }
    }

    pub fn current_step(&self) -> Option<String> {
        self.current.lock().unwrap().clone()
    }

    pub fn finish(&self, report: &RunReport) -> RunLog {
        let mut log = self.log.lock().unwrap();
        log.finish(report);
        log.clone()
    }

    fn emit(&self, event: serde_json::Value) {
        if self.json {
            println!("{}", event);
        }
    }
}

impl ExecutionHooks for ReportingHooks {
    fn on_step_start(&self, step: &Step) {
        *self.current.lock().unwrap() = Some(step.id.clone());
        self.log
            .lock()
            .unwrap()
            .open(&step.id, Some(step.kind().to_string()))
            .attempts += 1;
        self.emit(json!({
            "event": "step_start",
            "step": step.id,
            "type": step.kind().to_string(),
            "attempt": step.retry_count + 1,
        }));
    }

    fn on_step_progress(&self, step_id: &str, percent: f64) {
        self.emit(json!({ "event": "step_progress", "step": step_id, "percent": percent }));
    }

    fn on_step_complete(&self, step_id: &str, success: bool, error: Option<&str>) {
        *self.current.lock().unwrap() = None;
        {
            let mut log = self.log.lock().unwrap();
            let result = log.open(step_id, None);
            result.completed_at = Some(Utc::now());
            result.success = success;
            result.error = error.map(String::from);
        }
        self.emit(json!({
            "event": "step_complete",
            "step": step_id,
            "success": success,
            "error": error,
        }));
    }

    fn on_sequence_complete(&self, success: bool) {
        if !self.json {
            println!("Sequence {}", if success { "completed" } else { "failed" });
        }
        self.emit(json!({ "event": "sequence_complete", "success": success }));
    }

    fn on_log(&self, message: &str, level: log::Level) {
        self.emit(json!({ "event": "log", "level": level.as_str(), "message": message }));
    }

    fn on_overall_progress(&self, percent: f64) {
        self.log.lock().unwrap().progress = percent;
        let decile = (percent / 10.0).floor() as u32;
        let mut last = self.last_decile.lock().unwrap();
        if decile > *last {
            *last = decile;
            if !self.json {
                println!("Progress: {:.0}%", percent);
            }
        }
        self.emit(json!({ "event": "progress", "percent": percent }));
    }
}
