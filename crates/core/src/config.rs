//! Configuration data model.
//!
//! The on-disk format is TOML; loading the file is the host's concern, this
//! module owns the in-memory shape handed to the scheduler and the
//! pre-flight validation that must pass before anything is dispatched.

use crate::condition;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use zr_task_graph::TaskNodeData;

/// Command to execute: a shell string run through the configured shell, or
/// an argv list executed directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CommandSpec {
    /// Single string, run via `<shell> -c` (POSIX) or `cmd.exe /C` (Windows).
    Shell(String),
    /// Argv list, executed without shell interpretation.
    Argv(Vec<String>),
}

impl CommandSpec {
    /// Canonical form used for fingerprinting: shell strings are trimmed,
    /// argv lists are joined with NUL separators.
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            CommandSpec::Shell(s) => s.trim().to_string(),
            CommandSpec::Argv(parts) => parts.join("\u{0}"),
        }
    }

    /// Human-readable form for logs and summaries.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            CommandSpec::Shell(s) => s.clone(),
            CommandSpec::Argv(parts) => parts.join(" "),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            CommandSpec::Shell(s) => s.trim().is_empty(),
            CommandSpec::Argv(parts) => parts.is_empty() || parts[0].trim().is_empty(),
        }
    }
}

/// Backoff growth between retry attempts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    Fixed,
    Exponential,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_backoff_ms() -> u64 {
    100
}

/// Retry policy for a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts including the first one. Must be at least 1.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff between attempts.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default)]
    pub backoff_strategy: BackoffStrategy,
    /// Exit codes eligible for retry. Empty means all non-zero codes.
    #[serde(default)]
    pub on_exit_codes: Vec<u8>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            backoff_strategy: BackoffStrategy::default(),
            on_exit_codes: Vec::new(),
        }
    }
}

impl RetryConfig {
    /// Whether a failure with `exit_code` is eligible for another attempt.
    #[must_use]
    pub fn covers(&self, exit_code: i32) -> bool {
        if self.on_exit_codes.is_empty() {
            return true;
        }
        u8::try_from(exit_code)
            .map(|code| self.on_exit_codes.contains(&code))
            .unwrap_or(false)
    }

    /// Sleep before attempt `next_attempt` (2-based: the delay preceding
    /// the second attempt is the base backoff).
    #[must_use]
    pub fn delay_before(&self, next_attempt: u32) -> Duration {
        let base = self.backoff_ms;
        let ms = match self.backoff_strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Exponential => {
                let exp = next_attempt.saturating_sub(2).min(32);
                base.saturating_mul(1u64 << exp)
            }
        };
        Duration::from_millis(ms)
    }
}

/// Cache behaviour for a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Globs resolved against the project root; matched file contents feed
    /// the fingerprint.
    #[serde(default)]
    pub input_globs: Vec<String>,
    /// Declared outputs (logging/UI only; nothing is archived).
    #[serde(default)]
    pub output_globs: Vec<String>,
    /// Free-form strings mixed into the fingerprint.
    #[serde(default)]
    pub extra_key_fields: Vec<String>,
}

/// Remote cache backend selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum RemoteCacheConfig {
    Http {
        url: String,
        #[serde(default)]
        token: Option<String>,
    },
    S3 {
        bucket: String,
        region: String,
        #[serde(default)]
        prefix: String,
    },
    /// Reserved backend identifier.
    Gcs {},
    /// Reserved backend identifier.
    Azure {},
}

/// A single declarative task definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSpec {
    /// Unique identifier, filled from the TOML table key.
    #[serde(skip)]
    pub name: String,

    /// Command to execute.
    pub cmd: CommandSpec,

    /// Working directory, relative paths resolve against the project root.
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Environment overlay, merged over the inherited environment unless
    /// `clean_env` is set.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Start from an empty environment instead of inheriting.
    #[serde(default)]
    pub clean_env: bool,

    /// Names of tasks that must complete successfully first.
    #[serde(default)]
    pub deps: Vec<String>,

    /// Boolean expression gating execution (see [`crate::condition`]).
    #[serde(default)]
    pub condition: Option<String>,

    /// Wall-clock limit per attempt; 0 means none.
    #[serde(default)]
    pub timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// A failure neither triggers fail-fast nor poisons dependents.
    #[serde(default)]
    pub ignore_failure: bool,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Declared outputs, for logging/UI only.
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl TaskNodeData for TaskSpec {
    fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.deps.iter().map(String::as_str)
    }
}

fn name_is_identifier_safe(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

/// Top-level configuration handed to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Shell used for [`CommandSpec::Shell`] commands. Defaults to `sh`
    /// (`cmd.exe` on Windows).
    #[serde(default)]
    pub shell: Option<String>,

    #[serde(default)]
    pub tasks: HashMap<String, TaskSpec>,

    #[serde(default)]
    pub remote_cache: Option<RemoteCacheConfig>,
}

impl Config {
    /// Parse a TOML document into a validated configuration.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(input)
            .map_err(|e| Error::configuration(format!("malformed config: {e}")))?;
        for (name, spec) in &mut config.tasks {
            spec.name = name.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Look up a task by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TaskSpec> {
        self.tasks.get(name)
    }

    /// The shell used for string commands.
    #[must_use]
    pub fn shell_program(&self) -> &str {
        self.shell.as_deref().unwrap_or(default_shell())
    }

    /// Pre-flight checks: identifier-safe names, resolvable dependencies,
    /// parseable conditions, sane retry bounds. Nothing enters the
    /// scheduler before this passes.
    pub fn validate(&self) -> Result<()> {
        for (name, spec) in &self.tasks {
            if !name_is_identifier_safe(name) {
                return Err(Error::configuration(format!(
                    "task name '{name}' contains unsupported characters"
                )));
            }
            if spec.cmd.is_empty() {
                return Err(Error::configuration(format!(
                    "task '{name}' has an empty command"
                )));
            }
            if spec.retry.max_attempts == 0 {
                return Err(Error::configuration(format!(
                    "task '{name}': retry.max_attempts must be at least 1"
                )));
            }
            for dep in &spec.deps {
                if !self.tasks.contains_key(dep) {
                    return Err(Error::UnknownDependency {
                        from: name.clone(),
                        missing: dep.clone(),
                    });
                }
            }
            if let Some(expr) = &spec.condition {
                condition::parse(expr)?;
            }
        }
        Ok(())
    }
}

fn default_shell() -> &'static str {
    if cfg!(windows) { "cmd.exe" } else { "sh" }
}

/// Stdio handling for spawned tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdioPolicy {
    /// Pass the parent's stdio through to the child.
    Inherit,
    /// Capture a bounded tail of each stream.
    #[default]
    Pipe,
}

/// Options controlling one `run` invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum simultaneously running tasks. Defaults to the CPU count.
    pub max_jobs: usize,
    /// Sample child RSS/CPU while tasks run.
    pub monitor: bool,
    /// Colours and progress output on a TTY.
    pub use_color: bool,
    pub stdio: StdioPolicy,
    /// Stop dispatching and cancel in-flight work on the first failure.
    pub fail_fast: bool,
    /// Bypass the cache entirely for this run.
    pub no_cache: bool,
    /// Host-owned cancellation handle (e.g. wired to SIGINT).
    pub cancellation: CancellationToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_jobs: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4),
            monitor: true,
            use_color: false,
            stdio: StdioPolicy::default(),
            fail_fast: true,
            no_cache: false,
            cancellation: CancellationToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(toml: &str) -> Result<Config> {
        Config::from_toml_str(toml)
    }

    #[test]
    fn parses_shell_and_argv_commands() {
        let config = minimal(
            r#"
            [tasks.build]
            cmd = "cargo build"

            [tasks.lint]
            cmd = ["cargo", "clippy", "--all-targets"]
            "#,
        )
        .unwrap();

        assert_eq!(
            config.get("build").unwrap().cmd,
            CommandSpec::Shell("cargo build".into())
        );
        assert_eq!(
            config.get("lint").unwrap().cmd,
            CommandSpec::Argv(vec!["cargo".into(), "clippy".into(), "--all-targets".into()])
        );
    }

    #[test]
    fn task_names_are_filled_from_table_keys() {
        let config = minimal("[tasks.test]\ncmd = \"true\"\n").unwrap();
        assert_eq!(config.get("test").unwrap().name, "test");
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = minimal(
            r#"
            [tasks.build]
            cmd = "true"
            deps = ["ghost"]
            "#,
        )
        .unwrap_err();
        match err {
            Error::UnknownDependency { from, missing } => {
                assert_eq!(from, "build");
                assert_eq!(missing, "ghost");
            }
            other => panic!("expected UnknownDependency, got {other}"),
        }
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(minimal("[tasks.noop]\ncmd = \"\"\n").is_err());
        assert!(minimal("[tasks.noop]\ncmd = []\n").is_err());
    }

    #[test]
    fn zero_max_attempts_is_rejected() {
        let err = minimal(
            r#"
            [tasks.flaky]
            cmd = "true"
            retry = { max_attempts = 0 }
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn bad_condition_fails_at_preflight() {
        let err = minimal(
            r#"
            [tasks.cond]
            cmd = "true"
            condition = "env.CI =="
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Condition { .. }));
    }

    #[test]
    fn weird_task_names_are_rejected() {
        assert!(minimal("[tasks.\"has space\"]\ncmd = \"true\"\n").is_err());
    }

    #[test]
    fn retry_defaults() {
        let retry = RetryConfig::default();
        assert_eq!(retry.max_attempts, 1);
        assert!(retry.covers(1));
        assert!(retry.covers(255));
    }

    #[test]
    fn retry_exit_code_filter() {
        let retry = RetryConfig {
            on_exit_codes: vec![1, 75],
            ..RetryConfig::default()
        };
        assert!(retry.covers(1));
        assert!(retry.covers(75));
        assert!(!retry.covers(2));
        assert!(!retry.covers(-1));
    }

    #[test]
    fn exponential_backoff_doubles() {
        let retry = RetryConfig {
            backoff_ms: 10,
            backoff_strategy: BackoffStrategy::Exponential,
            ..RetryConfig::default()
        };
        assert_eq!(retry.delay_before(2), Duration::from_millis(10));
        assert_eq!(retry.delay_before(3), Duration::from_millis(20));
        assert_eq!(retry.delay_before(4), Duration::from_millis(40));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let retry = RetryConfig {
            backoff_ms: 50,
            ..RetryConfig::default()
        };
        assert_eq!(retry.delay_before(2), Duration::from_millis(50));
        assert_eq!(retry.delay_before(5), Duration::from_millis(50));
    }

    #[test]
    fn canonical_argv_uses_nul_separators() {
        let cmd = CommandSpec::Argv(vec!["echo".into(), "a b".into()]);
        assert_eq!(cmd.canonical(), "echo\u{0}a b");
    }

    #[test]
    fn remote_cache_backends_parse() {
        let config = minimal(
            r#"
            [remote_cache]
            backend = "s3"
            bucket = "artifacts"
            region = "eu-west-1"

            [tasks.t]
            cmd = "true"
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.remote_cache,
            Some(RemoteCacheConfig::S3 { .. })
        ));

        let config = minimal(
            r#"
            [remote_cache]
            backend = "gcs"

            [tasks.t]
            cmd = "true"
            "#,
        )
        .unwrap();
        assert!(matches!(config.remote_cache, Some(RemoteCacheConfig::Gcs {})));
    }
}
