//! Core execution engine for zr.
//!
//! Takes a parsed [`Config`] and a set of requested task names and produces
//! a correctly ordered, cache-aware, parallel execution with per-task
//! retry, timeout, condition evaluation, resource monitoring, and history
//! recording.

pub mod cache;
pub mod condition;
pub mod config;
pub mod fingerprint;
pub mod history;
pub mod hooks;
pub mod process;
pub mod runner;
pub mod scheduler;

pub use cache::CacheStore;
pub use condition::SystemContext;
pub use config::{
    BackoffStrategy, CacheConfig, CommandSpec, Config, RemoteCacheConfig, RetryConfig,
    RunOptions, StdioPolicy, TaskSpec,
};
pub use history::{HistoryLog, HistoryRecord};
pub use hooks::{HookRegistry, TaskObserver};
pub use runner::{RunResult, TaskOutcome, TaskRunner};
pub use scheduler::{OverallStatus, ScheduleResult, Scheduler};

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for zr operations.
///
/// Task-level failures do not surface here; they travel in
/// [`RunResult::outcome`](runner::RunResult). This type covers pre-flight
/// and infrastructure errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("task '{from}' depends on unknown task '{missing}'")]
    UnknownDependency { from: String, missing: String },

    #[error("dependency cycle involving: {}", witness.join(", "))]
    CycleDetected { witness: Vec<String> },

    #[error("condition parse error in '{expr}': {message}")]
    Condition { expr: String, message: String },

    #[error("failed to spawn task '{task}': {source}")]
    Spawn {
        task: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error during {operation}: {source}")]
    Io {
        operation: String,
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    #[error("cache error: {0}")]
    Cache(String),

    #[error("remote cache backend '{0}' is not implemented")]
    RemoteNotImplemented(&'static str),

    #[error("history error: {0}")]
    History(String),

    #[error("run cancelled")]
    Cancelled,
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn cache(msg: impl Into<String>) -> Self {
        Error::Cache(msg.into())
    }

    pub fn history(msg: impl Into<String>) -> Self {
        Error::History(msg.into())
    }

    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            operation: operation.into(),
            path: None,
            source,
        }
    }

    pub fn io_at(operation: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            operation: operation.into(),
            path: Some(path.into()),
            source,
        }
    }
}

impl From<zr_task_graph::Error> for Error {
    fn from(err: zr_task_graph::Error) -> Self {
        match err {
            zr_task_graph::Error::CycleDetected { witness } => Error::CycleDetected { witness },
            zr_task_graph::Error::MissingDependencies { mut missing } => {
                // Surface the first offender; the rest repeat the same fix.
                let (from, dep) = missing.remove(0);
                if from == "<requested>" {
                    Error::Configuration(format!("unknown task '{dep}'"))
                } else {
                    Error::UnknownDependency { from, missing: dep }
                }
            }
        }
    }
}

/// Result type alias for zr operations.
pub type Result<T> = std::result::Result<T, Error>;
