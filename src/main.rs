mod abort;
mod config;
mod executor;
mod report;
mod sequence;

use clap::{Parser, Subcommand};
use std::fs;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::executor::{
    ExecutionContext, Executor, ExecutorError, RunControl, RunReport, RunStatus, SimulatedRig,
};
use crate::report::ReportingHooks;
use crate::sequence::{Sequence, Step};

#[derive(Parser)]
#[command(name = "scope-o-mat")]
#[command(about = "Unattended imaging sequence execution")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a sequence file
    Validate { sequence: String },
    /// Execute a sequence file
    Run {
        sequence: String,
        /// Runtime configuration (YAML)
        #[arg(long)]
        config: Option<String>,
        /// 1-based step to resume from
        #[arg(long, default_value_t = 1)]
        start: usize,
        /// Print every hook event as a JSON line
        #[arg(long)]
        json: bool,
        /// Print the run log as YAML when done
        #[arg(long)]
        report: bool,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { sequence } => validate(&sequence),
        Commands::Run {
            sequence,
            config,
            start,
            json,
            report,
        } => {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("Failed to start runtime: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            let code = runtime.block_on(run(&sequence, config.as_deref(), start, json, report));
            // The stdin reader may still be parked in a blocking read.
            runtime.shutdown_background();
            code
        }
    }
}

fn load_sequence(path: &str) -> Option<Sequence> {
    let yaml = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error reading file: {}", e);
            return None;
        }
    };

    match Sequence::from_str(&yaml) {
        Ok(s) => Some(s),
        Err(e) => {
            eprintln!("Parse error: {}", e);
            None
        }
    }
}

fn validate(path: &str) -> ExitCode {
    let Some(sequence) = load_sequence(path) else {
        return ExitCode::FAILURE;
    };

    println!(
        "Sequence is valid ({} steps, planned {})",
        sequence.steps.len(),
        humantime::format_duration(sequence.planned_duration())
    );
    for (i, step) in sequence.steps.iter().enumerate() {
        println!("  {}: {}", i + 1, step_summary(step));
    }
    ExitCode::SUCCESS
}

async fn run(
    path: &str,
    config_path: Option<&str>,
    start: usize,
    json: bool,
    print_report: bool,
) -> ExitCode {
    let config = match config_path.map(Config::from_file).transpose() {
        Ok(c) => c.unwrap_or_default(),
        Err(e) => {
            eprintln!("Config error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let Some(sequence) = load_sequence(path) else {
        return ExitCode::FAILURE;
    };

    let executor = Arc::new(Executor::new(SimulatedRig::new(&config.simulator), &config));
    let hooks = Arc::new(ReportingHooks::new(json));
    let control = Arc::new(RunControl::new());

    let interrupt = CancellationToken::new();
    {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupt received, aborting sequence");
                interrupt.cancel();
            }
        });
    }
    spawn_operator_console(executor.clone(), control.clone(), hooks.clone());

    let ctx = ExecutionContext::new(sequence, hooks.clone())
        .starting_at(start.saturating_sub(1))
        .with_cancellation(interrupt)
        .with_control(control);
    log::info!("Run {} started at {}", ctx.run_id, chrono::Utc::now());

    let (report, code) = match executor.run(ctx).await {
        Ok(report) => {
            let code = match report.status {
                RunStatus::Completed => ExitCode::SUCCESS,
                RunStatus::Failed | RunStatus::Aborted => ExitCode::FAILURE,
            };
            (Some(report), code)
        }
        Err(ExecutorError::Escalated { report, source, .. }) => {
            eprintln!("Sequence failed: {}", source);
            (Some(*report), ExitCode::FAILURE)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            (None, ExitCode::FAILURE)
        }
    };

    if let Some(report) = report {
        summarize(&report);
        log::info!("Focuser left at {}", executor.focuser_position());
        if print_report {
            match hooks.finish(&report).to_yaml() {
                Ok(yaml) => println!("{}", yaml),
                Err(e) => eprintln!("Failed to serialize run log: {}", e),
            }
        }
    }
    code
}

/// Reads operator commands from stdin for the lifetime of the run.
fn spawn_operator_console(
    executor: Arc<Executor<SimulatedRig>>,
    control: Arc<RunControl>,
    hooks: Arc<ReportingHooks>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match line.trim() {
                "pause" => control.request_pause(),
                "resume" => control.request_resume(),
                "abort" => control.request_abort(),
                "skip" => {
                    control.request_skip();
                    executor.cancel_current_step();
                }
                "retry" => {
                    control.request_retry();
                    executor.cancel_current_step();
                }
                "status" => println!(
                    "current step: {}, paused: {}",
                    hooks.current_step().as_deref().unwrap_or("-"),
                    control.is_paused()
                ),
                "" => {}
                other => eprintln!(
                    "unknown command '{}' (pause, resume, skip, retry, abort, status)",
                    other
                ),
            }
        }
    });
}

fn summarize(report: &RunReport) {
    println!(
        "Run {}: {:?} ({}/{} steps resolved: {} completed, {} failed, {} skipped, {:.0}%)",
        report.run_id,
        report.status,
        report.counts.resolved(),
        report.sequence.steps.len(),
        report.counts.completed,
        report.counts.failed,
        report.counts.skipped,
        report.progress
    );
}

fn step_summary(step: &Step) -> String {
    let mut line = format!(
        "{} [{}] {}",
        step.label(),
        step.kind(),
        humantime::format_duration(step.duration)
    );
    if !step.enabled {
        line.push_str(" (disabled)");
    }
    if step.retry_budget > 0 {
        line.push_str(&format!(" retries={}", step.retry_budget));
    }
    line
}
