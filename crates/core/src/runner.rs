//! Single-task execution.
//!
//! [`TaskRunner::run_one`] owns the full lifecycle of one task: cache
//! short-circuit, condition gate, environment resolution, the attempt loop
//! with timeout and backoff, resource sampling, and cache recording on
//! success. Task-level failures are reported through
//! [`RunResult::outcome`], never as errors.

use crate::cache::{CacheStore, RemoteCache};
use crate::condition::{self, SystemContext};
use crate::config::{CommandSpec, RunOptions, StdioPolicy, TaskSpec};
use crate::fingerprint;
use crate::process::{self, ResourcePeaks, WaitOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bytes of stdout/stderr tail kept per stream.
pub const OUTPUT_TAIL_BYTES: usize = 8 * 1024;

/// Grace period between SIGTERM and SIGKILL on timeout or cancellation.
const TERMINATION_GRACE: Duration = Duration::from_secs(2);

/// Synthetic exit code reported when the process could not be spawned or
/// died without one.
const SYNTHETIC_EXIT_CODE: i32 = -1;

/// Why a task did or did not produce an exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Success,
    Failed,
    SkippedCache,
    SkippedCondition,
    SkippedUpstream,
    TimedOut,
    Cancelled,
}

impl TaskOutcome {
    /// Whether dependents may run. Cache and condition skips propagate as
    /// success.
    #[must_use]
    pub fn counts_as_success(self) -> bool {
        matches!(
            self,
            TaskOutcome::Success | TaskOutcome::SkippedCache | TaskOutcome::SkippedCondition
        )
    }

    /// Whether the task never spawned a process.
    #[must_use]
    pub fn is_skip(self) -> bool {
        matches!(
            self,
            TaskOutcome::SkippedCache | TaskOutcome::SkippedCondition | TaskOutcome::SkippedUpstream
        )
    }

    /// Short label for summaries and logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            TaskOutcome::Success => "success",
            TaskOutcome::Failed => "failed",
            TaskOutcome::SkippedCache => "skipped (cache)",
            TaskOutcome::SkippedCondition => "skipped (condition)",
            TaskOutcome::SkippedUpstream => "skipped (upstream)",
            TaskOutcome::TimedOut => "timed out",
            TaskOutcome::Cancelled => "cancelled",
        }
    }
}

/// Everything known about one task's run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub task_name: String,
    pub outcome: TaskOutcome,
    pub exit_code: Option<i32>,
    /// Number of spawns; 0 for skipped tasks.
    pub attempts: u32,
    pub duration_ms: u64,
    pub peak_rss_bytes: u64,
    pub peak_cpu_pct: f64,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub fingerprint: Option<String>,
}

impl RunResult {
    /// A result for a task that never spawned.
    #[must_use]
    pub fn skipped(task_name: impl Into<String>, outcome: TaskOutcome) -> Self {
        let now = Utc::now();
        Self {
            task_name: task_name.into(),
            outcome,
            exit_code: None,
            attempts: 0,
            duration_ms: 0,
            peak_rss_bytes: 0,
            peak_cpu_pct: 0.0,
            start_ts: now,
            end_ts: now,
            stdout_tail: String::new(),
            stderr_tail: String::new(),
            fingerprint: None,
        }
    }
}

/// Per-run state shared by every runner invocation.
pub struct RunContext {
    /// Shell used for string commands.
    pub shell: String,
    /// Project root: default cwd and glob anchor.
    pub root: PathBuf,
    pub options: RunOptions,
    pub cache: Option<CacheStore>,
    pub remote: Option<Arc<dyn RemoteCache>>,
    pub conditions: SystemContext,
}

/// Executes single tasks against a shared [`RunContext`].
#[derive(Clone)]
pub struct TaskRunner {
    ctx: Arc<RunContext>,
}

impl TaskRunner {
    #[must_use]
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }

    /// Run one task to completion and report what happened.
    pub async fn run_one(&self, task: &TaskSpec) -> RunResult {
        let start = Instant::now();
        let start_ts = Utc::now();

        // Cache short-circuit: local marker first, then the remote as a
        // strict optimisation. Any cache error degrades to a miss.
        let fingerprint = self.resolve_fingerprint(task);
        if let Some(key) = &fingerprint {
            if self.cache_hit(key).await {
                debug!(task = %task.name, key = %key, "cache hit");
                return RunResult {
                    fingerprint: fingerprint.clone(),
                    ..RunResult::skipped(&task.name, TaskOutcome::SkippedCache)
                };
            }
        }

        // Condition gate. Expressions were parsed at pre-flight; a parse
        // failure here means the config was mutated mid-run, so run the
        // task rather than silently skipping it.
        if let Some(source) = &task.condition {
            match condition::parse(source) {
                Ok(expr) => {
                    if !expr.eval_bool(&self.ctx.conditions) {
                        debug!(task = %task.name, condition = %source, "condition false");
                        return RunResult::skipped(&task.name, TaskOutcome::SkippedCondition);
                    }
                }
                Err(e) => warn!(task = %task.name, error = %e, "condition failed to parse"),
            }
        }

        let (outcome, exit_code, attempts, peaks, stdout_tail, stderr_tail) =
            self.attempt_loop(task).await;

        if outcome == TaskOutcome::Success
            && let Some(key) = &fingerprint
        {
            self.record_success(key).await;
        }

        let end_ts = Utc::now();
        let result = RunResult {
            task_name: task.name.clone(),
            outcome,
            exit_code,
            attempts,
            duration_ms: start.elapsed().as_millis() as u64,
            peak_rss_bytes: peaks.peak_rss_bytes(),
            peak_cpu_pct: peaks.peak_cpu_pct(),
            start_ts,
            end_ts,
            stdout_tail,
            stderr_tail,
            fingerprint,
        };

        match result.outcome {
            TaskOutcome::Success => {
                info!(task = %task.name, attempts = result.attempts, duration_ms = result.duration_ms, "task succeeded");
            }
            TaskOutcome::Failed | TaskOutcome::TimedOut => {
                warn!(task = %task.name, outcome = result.outcome.label(), exit = ?result.exit_code, "task failed");
            }
            _ => {}
        }

        result
    }

    /// The attempt loop: spawn, wait (with timeout/cancellation), classify,
    /// back off and retry while the policy allows.
    async fn attempt_loop(
        &self,
        task: &TaskSpec,
    ) -> (TaskOutcome, Option<i32>, u32, ResourcePeaks, String, String) {
        let peaks = ResourcePeaks::new();
        let cancel = &self.ctx.options.cancellation;
        let timeout = (task.timeout_ms > 0).then(|| Duration::from_millis(task.timeout_ms));
        let mut attempts = 0u32;
        let mut exit_code: Option<i32> = None;
        let mut stdout_tail = String::new();
        let mut stderr_tail = String::new();

        let outcome = loop {
            if cancel.is_cancelled() {
                break TaskOutcome::Cancelled;
            }
            attempts += 1;

            let mut cmd = self.build_command(task);
            let mut child = match process::spawn_in_group(&mut cmd) {
                Ok(child) => child,
                Err(e) => {
                    // OS-level spawn errors are final: there is no exit
                    // code for a retry rule to match.
                    let err = crate::Error::Spawn {
                        task: task.name.clone(),
                        source: e,
                    };
                    warn!(error = %err, "spawn failed");
                    exit_code = Some(SYNTHETIC_EXIT_CODE);
                    break TaskOutcome::Failed;
                }
            };
            debug!(task = %task.name, attempt = attempts, pid = ?child.pid(), cmd = %task.cmd.display(), "spawned");

            let sampler = if self.ctx.options.monitor {
                child.pid().map(|pid| process::spawn_sampler(pid, peaks.clone()))
            } else {
                None
            };
            let stdout_reader = child.take_stdout().map(spawn_tail_reader);
            let stderr_reader = child.take_stderr().map(spawn_tail_reader);

            let waited = child.wait_with_timeout(timeout, cancel).await;

            if let Some(sampler) = sampler {
                sampler.abort();
            }

            let wait = match waited {
                Ok(wait) => wait,
                Err(e) => {
                    warn!(task = %task.name, error = %e, "wait failed");
                    child.terminate_group(Duration::ZERO).await;
                    stdout_tail = collect_tail(stdout_reader).await;
                    stderr_tail = collect_tail(stderr_reader).await;
                    exit_code = Some(SYNTHETIC_EXIT_CODE);
                    break TaskOutcome::Failed;
                }
            };

            match wait {
                WaitOutcome::Exited(status) => {
                    stdout_tail = collect_tail(stdout_reader).await;
                    stderr_tail = collect_tail(stderr_reader).await;
                    let code = status.code().unwrap_or(SYNTHETIC_EXIT_CODE);
                    exit_code = Some(code);
                    if status.success() {
                        break TaskOutcome::Success;
                    }
                    if attempts < task.retry.max_attempts && task.retry.covers(code) {
                        debug!(task = %task.name, attempt = attempts, exit = code, "retrying");
                        if !self.backoff(task, attempts).await {
                            break TaskOutcome::Cancelled;
                        }
                        continue;
                    }
                    break TaskOutcome::Failed;
                }
                WaitOutcome::TimedOut => {
                    warn!(task = %task.name, attempt = attempts, timeout_ms = task.timeout_ms, "timed out");
                    child.terminate_group(TERMINATION_GRACE).await;
                    stdout_tail = collect_tail(stdout_reader).await;
                    stderr_tail = collect_tail(stderr_reader).await;
                    exit_code = None;
                    // Timeouts carry no exit code, so only a catch-all
                    // retry rule applies to them.
                    if attempts < task.retry.max_attempts && task.retry.on_exit_codes.is_empty() {
                        if !self.backoff(task, attempts).await {
                            break TaskOutcome::Cancelled;
                        }
                        continue;
                    }
                    break TaskOutcome::TimedOut;
                }
                WaitOutcome::Cancelled => {
                    child.terminate_group(Duration::ZERO).await;
                    stdout_tail = collect_tail(stdout_reader).await;
                    stderr_tail = collect_tail(stderr_reader).await;
                    break TaskOutcome::Cancelled;
                }
            }
        };

        (outcome, exit_code, attempts, peaks, stdout_tail, stderr_tail)
    }

    /// Sleep the backoff delay before the next attempt. Returns `false`
    /// when cancellation arrived mid-sleep.
    async fn backoff(&self, task: &TaskSpec, completed_attempts: u32) -> bool {
        let delay = task.retry.delay_before(completed_attempts + 1);
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            () = self.ctx.options.cancellation.cancelled() => false,
        }
    }

    fn build_command(&self, task: &TaskSpec) -> Command {
        let mut cmd = match &task.cmd {
            CommandSpec::Shell(script) => {
                let mut cmd = Command::new(&self.ctx.shell);
                cmd.arg(if cfg!(windows) { "/C" } else { "-c" });
                cmd.arg(script);
                cmd
            }
            CommandSpec::Argv(parts) => {
                let mut cmd = Command::new(&parts[0]);
                cmd.args(&parts[1..]);
                cmd
            }
        };

        let cwd = match &task.cwd {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.ctx.root.join(dir),
            None => self.ctx.root.clone(),
        };
        cmd.current_dir(cwd);

        if task.clean_env {
            cmd.env_clear();
        }
        for (name, value) in &task.env {
            cmd.env(name, value);
        }

        match self.ctx.options.stdio {
            StdioPolicy::Inherit => {
                cmd.stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit());
            }
            StdioPolicy::Pipe => {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
            }
        }

        cmd.kill_on_drop(true);
        cmd
    }

    fn resolve_fingerprint(&self, task: &TaskSpec) -> Option<String> {
        if !task.cache.enabled || self.ctx.options.no_cache || self.ctx.cache.is_none() {
            return None;
        }
        match fingerprint::compute(task, &self.ctx.root) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(task = %task.name, error = %e, "fingerprint failed, treating as cache miss");
                None
            }
        }
    }

    async fn cache_hit(&self, key: &str) -> bool {
        let Some(cache) = &self.ctx.cache else {
            return false;
        };
        if cache.has_hit(key) {
            return true;
        }
        if let Some(remote) = &self.ctx.remote {
            match remote.pull(key).await {
                Ok(Some(_)) => {
                    if let Err(e) = cache.record_hit(key) {
                        warn!(key, error = %e, "failed to record remote hit locally");
                    }
                    return true;
                }
                Ok(None) => {}
                Err(e) => warn!(key, backend = remote.name(), error = %e, "remote pull failed"),
            }
        }
        false
    }

    async fn record_success(&self, key: &str) {
        if let Some(cache) = &self.ctx.cache {
            if let Err(e) = cache.record_hit(key) {
                warn!(key, error = %e, "failed to record cache hit");
            }
            if let Some(remote) = &self.ctx.remote {
                // Entries are zero-length markers; pushing the empty body
                // mirrors the local layout.
                if let Err(e) = remote.push(key, &[]).await {
                    warn!(key, backend = remote.name(), error = %e, "remote push failed");
                }
            }
        }
    }
}

/// Bounded line buffer keeping the newest `budget` bytes.
struct TailBuffer {
    lines: VecDeque<String>,
    bytes: usize,
    budget: usize,
}

impl TailBuffer {
    fn new(budget: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            bytes: 0,
            budget,
        }
    }

    fn push(&mut self, line: String) {
        self.bytes += line.len() + 1;
        self.lines.push_back(line);
        while self.bytes > self.budget {
            match self.lines.pop_front() {
                Some(dropped) => self.bytes -= dropped.len() + 1,
                None => break,
            }
        }
    }

    fn into_string(self) -> String {
        let mut out = String::with_capacity(self.bytes);
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(line);
        }
        out
    }
}

fn spawn_tail_reader<R>(reader: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut tail = TailBuffer::new(OUTPUT_TAIL_BYTES);
        while let Ok(Some(line)) = lines.next_line().await {
            tail.push(line);
        }
        tail.into_string()
    })
}

async fn collect_tail(handle: Option<JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn spec(name: &str, cmd: CommandSpec) -> TaskSpec {
        TaskSpec {
            name: name.into(),
            cmd,
            cwd: None,
            env: std::collections::HashMap::new(),
            clean_env: false,
            deps: vec![],
            condition: None,
            timeout_ms: 0,
            retry: RetryConfig::default(),
            cache: crate::config::CacheConfig::default(),
            ignore_failure: false,
            description: None,
            tags: vec![],
            outputs: vec![],
        }
    }

    fn shell(name: &str, script: &str) -> TaskSpec {
        spec(name, CommandSpec::Shell(script.into()))
    }

    fn runner_at(root: &std::path::Path) -> TaskRunner {
        TaskRunner::new(Arc::new(RunContext {
            shell: "sh".into(),
            root: root.to_path_buf(),
            options: RunOptions {
                monitor: false,
                ..RunOptions::default()
            },
            cache: None,
            remote: None,
            conditions: SystemContext::new(),
        }))
    }

    fn runner_with_cache(root: &std::path::Path, cache: CacheStore) -> TaskRunner {
        TaskRunner::new(Arc::new(RunContext {
            shell: "sh".into(),
            root: root.to_path_buf(),
            options: RunOptions {
                monitor: false,
                ..RunOptions::default()
            },
            cache: Some(cache),
            remote: None,
            conditions: SystemContext::new(),
        }))
    }

    #[tokio::test]
    async fn simple_success() {
        let tmp = TempDir::new().unwrap();
        let result = runner_at(tmp.path()).run_one(&shell("ok", "true")).await;

        assert_eq!(result.outcome, TaskOutcome::Success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn captures_stdout_tail() {
        let tmp = TempDir::new().unwrap();
        let result = runner_at(tmp.path())
            .run_one(&shell("echo", "echo hello world"))
            .await;

        assert_eq!(result.outcome, TaskOutcome::Success);
        assert!(result.stdout_tail.contains("hello world"));
    }

    #[tokio::test]
    async fn failure_reports_exit_code() {
        let tmp = TempDir::new().unwrap();
        let result = runner_at(tmp.path()).run_one(&shell("bad", "exit 2")).await;

        assert_eq!(result.outcome, TaskOutcome::Failed);
        assert_eq!(result.exit_code, Some(2));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn argv_commands_skip_the_shell() {
        let tmp = TempDir::new().unwrap();
        let task = spec(
            "argv",
            CommandSpec::Argv(vec!["echo".into(), "; not a shell".into()]),
        );
        let result = runner_at(tmp.path()).run_one(&task).await;

        assert_eq!(result.outcome, TaskOutcome::Success);
        assert!(result.stdout_tail.contains("; not a shell"));
    }

    #[tokio::test]
    async fn spawn_error_is_final_failure() {
        let tmp = TempDir::new().unwrap();
        let mut task = spec(
            "ghost",
            CommandSpec::Argv(vec!["zr-definitely-not-a-binary".into()]),
        );
        task.retry.max_attempts = 3;
        let result = runner_at(tmp.path()).run_one(&task).await;

        assert_eq!(result.outcome, TaskOutcome::Failed);
        assert_eq!(result.exit_code, Some(SYNTHETIC_EXIT_CODE));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn retry_respects_max_attempts_and_backoff() {
        let tmp = TempDir::new().unwrap();
        let mut task = shell("flaky", "exit 1");
        task.retry = RetryConfig {
            max_attempts: 3,
            backoff_ms: 10,
            backoff_strategy: crate::config::BackoffStrategy::Exponential,
            on_exit_codes: vec![1],
        };

        let started = Instant::now();
        let result = runner_at(tmp.path()).run_one(&task).await;

        assert_eq!(result.outcome, TaskOutcome::Failed);
        assert_eq!(result.attempts, 3);
        // 10 ms + 20 ms of backoff at minimum.
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn retry_skips_uncovered_exit_codes() {
        let tmp = TempDir::new().unwrap();
        let mut task = shell("flaky", "exit 2");
        task.retry = RetryConfig {
            max_attempts: 3,
            backoff_ms: 10,
            on_exit_codes: vec![1],
            ..RetryConfig::default()
        };

        let result = runner_at(tmp.path()).run_one(&task).await;
        assert_eq!(result.outcome, TaskOutcome::Failed);
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn timeout_kills_the_task() {
        let tmp = TempDir::new().unwrap();
        let mut task = shell("slow", "sleep 5");
        task.timeout_ms = 200;

        let started = Instant::now();
        let result = runner_at(tmp.path()).run_one(&task).await;

        assert_eq!(result.outcome, TaskOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(200));
        // Well under the sleep duration: the child did not run to term.
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn condition_false_skips() {
        let tmp = TempDir::new().unwrap();
        let mut task = shell("gated", "true");
        task.condition = Some("false".into());

        let result = runner_at(tmp.path()).run_one(&task).await;
        assert_eq!(result.outcome, TaskOutcome::SkippedCondition);
        assert_eq!(result.attempts, 0);
    }

    #[tokio::test]
    async fn condition_true_runs() {
        let tmp = TempDir::new().unwrap();
        let mut task = shell("gated", "true");
        task.condition = Some("1 == 1".into());

        let result = runner_at(tmp.path()).run_one(&task).await;
        assert_eq!(result.outcome, TaskOutcome::Success);
    }

    #[tokio::test]
    async fn cache_hit_skips_spawn() {
        let tmp = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let cache = CacheStore::at(cache_dir.path()).unwrap();

        let mut task = shell("cached", "true");
        task.cache.enabled = true;

        let key = fingerprint::compute(&task, tmp.path()).unwrap();
        cache.record_hit(&key).unwrap();

        let result = runner_with_cache(tmp.path(), cache).run_one(&task).await;
        assert_eq!(result.outcome, TaskOutcome::SkippedCache);
        assert_eq!(result.attempts, 0);
        assert_eq!(result.fingerprint.as_deref(), Some(key.as_str()));
    }

    #[tokio::test]
    async fn success_records_cache_marker() {
        let tmp = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let cache = CacheStore::at(cache_dir.path()).unwrap();

        let mut task = shell("cached", "true");
        task.cache.enabled = true;
        let key = fingerprint::compute(&task, tmp.path()).unwrap();

        let runner = runner_with_cache(tmp.path(), cache.clone());
        let first = runner.run_one(&task).await;
        assert_eq!(first.outcome, TaskOutcome::Success);
        assert!(cache.has_hit(&key));

        let second = runner.run_one(&task).await;
        assert_eq!(second.outcome, TaskOutcome::SkippedCache);
    }

    #[tokio::test]
    async fn failure_is_never_cached() {
        let tmp = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let cache = CacheStore::at(cache_dir.path()).unwrap();

        let mut task = shell("failing", "exit 1");
        task.cache.enabled = true;
        let key = fingerprint::compute(&task, tmp.path()).unwrap();

        let result = runner_with_cache(tmp.path(), cache.clone()).run_one(&task).await;
        assert_eq!(result.outcome, TaskOutcome::Failed);
        assert!(!cache.has_hit(&key));
    }

    #[tokio::test]
    async fn env_overlay_reaches_the_child() {
        let tmp = TempDir::new().unwrap();
        let mut task = shell("env", "printenv ZR_RUNNER_TEST");
        task.env.insert("ZR_RUNNER_TEST".into(), "overlay".into());

        let result = runner_at(tmp.path()).run_one(&task).await;
        assert_eq!(result.outcome, TaskOutcome::Success);
        assert!(result.stdout_tail.contains("overlay"));
    }

    #[tokio::test]
    async fn clean_env_drops_inherited_vars() {
        let tmp = TempDir::new().unwrap();
        // PATH is gone under clean_env, so use an absolute shell path.
        let mut task = spec(
            "clean",
            CommandSpec::Argv(vec![
                "/bin/sh".into(),
                "-c".into(),
                "test -z \"$HOME\"".into(),
            ]),
        );
        task.clean_env = true;

        let result = runner_at(tmp.path()).run_one(&task).await;
        assert_eq!(result.outcome, TaskOutcome::Success);
    }

    #[tokio::test]
    async fn cwd_is_respected() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub/flag.txt"), b"here").unwrap();

        let mut task = shell("cwd", "cat flag.txt");
        task.cwd = Some(PathBuf::from("sub"));

        let result = runner_at(tmp.path()).run_one(&task).await;
        assert_eq!(result.outcome, TaskOutcome::Success);
        assert!(result.stdout_tail.contains("here"));
    }

    #[tokio::test]
    async fn pre_cancelled_token_yields_cancelled() {
        let tmp = TempDir::new().unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let runner = TaskRunner::new(Arc::new(RunContext {
            shell: "sh".into(),
            root: tmp.path().to_path_buf(),
            options: RunOptions {
                monitor: false,
                cancellation: token,
                ..RunOptions::default()
            },
            cache: None,
            remote: None,
            conditions: SystemContext::new(),
        }));

        let result = runner.run_one(&shell("never", "true")).await;
        assert_eq!(result.outcome, TaskOutcome::Cancelled);
        assert_eq!(result.attempts, 0);
    }

    #[test]
    fn tail_buffer_keeps_newest_lines() {
        let mut tail = TailBuffer::new(16);
        tail.push("first-line".into());
        tail.push("second-line".into());
        tail.push("third".into());

        let out = tail.into_string();
        assert!(!out.contains("first-line"));
        assert!(out.contains("third"));
    }

    #[test]
    fn outcome_propagation_rules() {
        assert!(TaskOutcome::Success.counts_as_success());
        assert!(TaskOutcome::SkippedCache.counts_as_success());
        assert!(TaskOutcome::SkippedCondition.counts_as_success());
        assert!(!TaskOutcome::Failed.counts_as_success());
        assert!(!TaskOutcome::TimedOut.counts_as_success());
        assert!(!TaskOutcome::SkippedUpstream.counts_as_success());
        assert!(!TaskOutcome::Cancelled.counts_as_success());
    }
}
