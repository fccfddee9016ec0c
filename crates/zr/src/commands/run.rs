//! `zr run`: execute tasks and their dependencies.

use colored::Colorize;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use zr_core::{Result, RunOptions, RunResult, ScheduleResult, Scheduler, StdioPolicy, TaskOutcome};

/// Lines of captured output echoed for each failed task.
const FAILURE_SNIPPET_LINES: usize = 20;

pub struct RunArgs {
    pub tasks: Vec<String>,
    pub jobs: Option<usize>,
    pub no_fail_fast: bool,
    pub no_cache: bool,
    pub inherit_stdio: bool,
    pub no_monitor: bool,
    pub use_color: bool,
}

pub async fn execute(config_path: Option<&Path>, args: RunArgs) -> Result<i32> {
    let (config, root) = super::load_config(config_path)?;
    colored::control::set_override(args.use_color);

    let cancellation = CancellationToken::new();
    spawn_signal_listener(cancellation.clone());

    let options = RunOptions {
        max_jobs: args.jobs.unwrap_or_else(|| RunOptions::default().max_jobs),
        monitor: !args.no_monitor,
        use_color: args.use_color,
        stdio: if args.inherit_stdio {
            StdioPolicy::Inherit
        } else {
            StdioPolicy::Pipe
        },
        fail_fast: !args.no_fail_fast,
        no_cache: args.no_cache,
        cancellation,
    };

    let scheduler = Scheduler::new(config).with_root(root);
    let schedule = scheduler.run(&args.tasks, options).await?;

    report(&schedule, args.use_color);
    Ok(schedule.overall.exit_code())
}

/// Cancel the run on Ctrl-C; the scheduler turns this into `cancelled`
/// outcomes and exit code 130.
fn spawn_signal_listener(cancellation: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            cancellation.cancel();
        }
    });
}

fn report(schedule: &ScheduleResult, use_color: bool) {
    for name in &schedule.order {
        let Some(result) = schedule.results.get(name) else {
            continue;
        };
        match result.outcome {
            TaskOutcome::Failed | TaskOutcome::TimedOut => print_failure(result),
            _ => {}
        }
    }

    let summary = schedule.summary();
    if use_color {
        let (_, failed, _) = schedule.counts();
        let styled = if failed > 0 {
            summary.red().bold()
        } else {
            summary.green()
        };
        eprintln!("{styled}");
    } else {
        eprintln!("{summary}");
    }
}

/// Echo the tail of a failed task's output, the exit code, and attempts.
fn print_failure(result: &RunResult) {
    eprintln!(
        "task '{}' {} (exit: {}, attempts: {})",
        result.task_name,
        result.outcome.label(),
        result
            .exit_code
            .map_or_else(|| "none".to_string(), |c| c.to_string()),
        result.attempts,
    );

    for (label, tail) in [("stdout", &result.stdout_tail), ("stderr", &result.stderr_tail)] {
        let trimmed = tail.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        let lines: Vec<&str> = trimmed.lines().collect();
        let start = lines.len().saturating_sub(FAILURE_SNIPPET_LINES);
        eprintln!("  {label}:");
        for line in &lines[start..] {
            eprintln!("    {line}");
        }
    }
}
