//! Level-by-level task scheduling.
//!
//! The scheduler builds the dependency graph over the requested closure,
//! levelises it, and dispatches each level through a bounded worker pool.
//! Each level is a barrier: every task in level N completes (succeeds,
//! skips, or fails) before anything in level N+1 starts. Within a level,
//! start order follows the requested traversal order; completion order is
//! unspecified.

use crate::cache::{remote, CacheStore};
use crate::condition::SystemContext;
use crate::config::{Config, RunOptions, TaskSpec};
use crate::history::{HistoryLog, HistoryRecord};
use crate::hooks::HookRegistry;
use crate::runner::{RunContext, RunResult, TaskOutcome, TaskRunner};
use crate::{Error, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use zr_task_graph::TaskGraph;

/// How the run as a whole concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Success,
    Failed,
    Cancelled,
}

impl OverallStatus {
    /// Conventional process exit code for the host.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            OverallStatus::Success => 0,
            OverallStatus::Failed => 1,
            OverallStatus::Cancelled => 130,
        }
    }
}

/// Aggregate outcome of one `run` invocation.
#[derive(Debug, Serialize)]
pub struct ScheduleResult {
    /// Per-task results, keyed by task name.
    pub results: HashMap<String, RunResult>,
    /// Task names in the order their results were recorded. With
    /// `max_jobs = 1` this is fully deterministic.
    pub order: Vec<String>,
    pub overall: OverallStatus,
    pub elapsed_ms: u64,
}

impl ScheduleResult {
    /// `(passed, failed, skipped)` counts for the summary line.
    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize) {
        let mut passed = 0;
        let mut failed = 0;
        let mut skipped = 0;
        for result in self.results.values() {
            match result.outcome {
                TaskOutcome::Success => passed += 1,
                TaskOutcome::Failed | TaskOutcome::TimedOut => failed += 1,
                TaskOutcome::SkippedCache
                | TaskOutcome::SkippedCondition
                | TaskOutcome::SkippedUpstream
                | TaskOutcome::Cancelled => skipped += 1,
            }
        }
        (passed, failed, skipped)
    }

    /// The one-line run summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let (passed, failed, skipped) = self.counts();
        format!(
            "{passed} passed, {failed} failed, {skipped} skipped, {} ms",
            self.elapsed_ms
        )
    }
}

/// Orchestrates a full run of requested tasks.
pub struct Scheduler {
    config: Config,
    root: PathBuf,
    hooks: HookRegistry,
    cache_override: Option<CacheStore>,
    history_override: Option<HistoryLog>,
}

impl Scheduler {
    /// Create a scheduler rooted at the current directory.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            hooks: HookRegistry::new(),
            cache_override: None,
            history_override: None,
        }
    }

    /// Anchor relative working directories and input globs at `root`.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Use an explicit cache store instead of the default directory.
    #[must_use]
    pub fn with_cache(mut self, cache: CacheStore) -> Self {
        self.cache_override = Some(cache);
        self
    }

    /// Use an explicit history log instead of the default location.
    #[must_use]
    pub fn with_history(mut self, history: HistoryLog) -> Self {
        self.history_override = Some(history);
        self
    }

    /// Observers to notify around task execution. Registration must happen
    /// before [`Scheduler::run`].
    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    /// Execute the requested tasks and everything they depend on.
    ///
    /// # Errors
    ///
    /// Pre-flight problems (validation, unknown tasks, cycles) surface as
    /// errors before anything is dispatched. Per-task failures are data in
    /// the returned [`ScheduleResult`].
    pub async fn run(&self, requested: &[String], options: RunOptions) -> Result<ScheduleResult> {
        if requested.is_empty() {
            return Err(Error::configuration("no tasks requested"));
        }
        self.config.validate()?;

        let mut graph = TaskGraph::new();
        graph.build_closure(requested, |name| self.config.get(name).cloned())?;
        if let Some(witness) = graph.cycle_witness() {
            return Err(Error::CycleDetected { witness });
        }
        let levels = graph.levelise()?;
        let total = graph.task_count();
        debug!(total, levels = levels.len(), "graph levelised");

        let ctx = Arc::new(RunContext {
            shell: self.config.shell_program().to_string(),
            root: self.root.clone(),
            options: options.clone(),
            cache: self.open_cache(&options),
            remote: self.open_remote()?,
            conditions: SystemContext::new(),
        });
        let runner = TaskRunner::new(ctx);
        let cancel = options.cancellation.clone();
        let max_jobs = options.max_jobs.max(1);
        let progress = build_progress(
            total as u64,
            options.use_color && std::io::stderr().is_terminal(),
        );

        self.hooks.fire_init();
        let started = Instant::now();

        let mut results: HashMap<String, RunResult> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut retry_total: u64 = 0;
        let mut any_failure = false;

        for level in levels {
            let mut queue: VecDeque<_> = level.into_iter().collect();
            let mut in_flight: JoinSet<RunResult> = JoinSet::new();

            while !queue.is_empty() || !in_flight.is_empty() {
                // Fill the concurrency window for this level.
                while in_flight.len() < max_jobs
                    && let Some(node) = queue.pop_front()
                {
                    if cancel.is_cancelled() || self.is_blocked(&node.task, &results) {
                        let result =
                            RunResult::skipped(&node.name, TaskOutcome::SkippedUpstream);
                        self.hooks
                            .fire_after_task(&node.name, result.outcome, result.exit_code);
                        progress.inc(1);
                        order.push(node.name.clone());
                        results.insert(node.name, result);
                        continue;
                    }

                    self.hooks.fire_before_task(&node.name);
                    progress.set_message(node.name.clone());
                    let runner = runner.clone();
                    let task = node.task;
                    in_flight.spawn(async move { runner.run_one(&task).await });
                }

                if let Some(joined) = in_flight.join_next().await {
                    let result = joined.map_err(|e| {
                        Error::configuration(format!("task execution panicked: {e}"))
                    })?;
                    self.hooks
                        .fire_after_task(&result.task_name, result.outcome, result.exit_code);
                    progress.inc(1);
                    retry_total += u64::from(result.attempts.saturating_sub(1));

                    let hard_failure = matches!(
                        result.outcome,
                        TaskOutcome::Failed | TaskOutcome::TimedOut
                    ) && !self.ignores_failure(&result.task_name);
                    if hard_failure {
                        any_failure = true;
                        if options.fail_fast {
                            debug!(task = %result.task_name, "fail-fast: cancelling run");
                            cancel.cancel();
                        }
                    }

                    order.push(result.task_name.clone());
                    results.insert(result.task_name.clone(), result);
                }
            }
        }

        progress.finish_and_clear();

        let overall = if any_failure {
            OverallStatus::Failed
        } else if cancel.is_cancelled() {
            OverallStatus::Cancelled
        } else {
            OverallStatus::Success
        };

        let schedule = ScheduleResult {
            results,
            order,
            overall,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            overall = ?schedule.overall,
            summary = %schedule.summary(),
            "run finished"
        );

        self.append_history(requested, &schedule, retry_total);

        Ok(schedule)
    }

    /// A task is blocked when any dependency did not conclude in a state
    /// dependents may build on. Condition skips count as success; failures
    /// of `ignore_failure` tasks do too.
    fn is_blocked(&self, task: &TaskSpec, results: &HashMap<String, RunResult>) -> bool {
        task.deps.iter().any(|dep| match results.get(dep) {
            Some(result) => {
                !(result.outcome.counts_as_success()
                    || (matches!(
                        result.outcome,
                        TaskOutcome::Failed | TaskOutcome::TimedOut
                    ) && self.ignores_failure(dep)))
            }
            // Level barrier guarantees dependency results exist; a missing
            // one means the dependency itself never ran.
            None => true,
        })
    }

    fn ignores_failure(&self, task: &str) -> bool {
        self.config.get(task).is_some_and(|spec| spec.ignore_failure)
    }

    fn open_cache(&self, options: &RunOptions) -> Option<CacheStore> {
        if options.no_cache {
            return None;
        }
        if let Some(cache) = &self.cache_override {
            return Some(cache.clone());
        }
        let wants_cache = self.config.tasks.values().any(|t| t.cache.enabled);
        if !wants_cache {
            return None;
        }
        match CacheStore::open_default() {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!(error = %e, "cache unavailable, running without it");
                None
            }
        }
    }

    /// Reserved backends are a configuration mistake and fail the run;
    /// anything else (missing credentials, say) degrades to local-only.
    fn open_remote(&self) -> Result<Option<Arc<dyn crate::cache::RemoteCache>>> {
        let Some(config) = &self.config.remote_cache else {
            return Ok(None);
        };
        match remote::from_config(config) {
            Ok(backend) => Ok(Some(backend)),
            Err(e @ Error::RemoteNotImplemented(_)) => Err(e),
            Err(e) => {
                warn!(error = %e, "remote cache unavailable, using local only");
                Ok(None)
            }
        }
    }

    fn append_history(&self, requested: &[String], schedule: &ScheduleResult, retry_total: u64) {
        let record = HistoryRecord {
            timestamp: Utc::now().timestamp(),
            task_name: requested[0].clone(),
            success: schedule.overall == OverallStatus::Success,
            duration_ms: schedule.elapsed_ms,
            task_count: schedule.results.len(),
            retry_count: retry_total,
        };
        let log = self
            .history_override
            .clone()
            .unwrap_or_else(HistoryLog::open_default);
        if let Err(e) = log.append(&record) {
            warn!(error = %e, "failed to append history record");
        }
    }
}

fn build_progress(total: u64, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::with_template("[{bar:24}] {pos}/{len} {msg}") {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}
