//! Before/after-task notification surface consumed by plugins.
//!
//! Observers register before `run` and are invoked synchronously on the
//! scheduler's coordinating task. A failing observer is logged and never
//! fails the task or the run.

use crate::runner::TaskOutcome;
use crate::Result;
use std::sync::Arc;
use tracing::warn;

/// Observer interface for run lifecycle notifications.
///
/// All methods default to no-ops so observers implement only what they
/// care about. Implementations must not block significantly.
pub trait TaskObserver: Send + Sync {
    /// Called once before the first task is dispatched.
    fn on_init(&self) -> Result<()> {
        Ok(())
    }

    /// Called before a task is dispatched to a worker.
    fn on_before_task(&self, _task: &str) -> Result<()> {
        Ok(())
    }

    /// Called after a task completes, with its outcome and exit code.
    fn on_after_task(
        &self,
        _task: &str,
        _outcome: TaskOutcome,
        _exit_code: Option<i32>,
    ) -> Result<()> {
        Ok(())
    }
}

/// A set of named observers.
#[derive(Default, Clone)]
pub struct HookRegistry {
    observers: Vec<(String, Arc<dyn TaskObserver>)>,
}

impl HookRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer under a name used in failure logs.
    pub fn register(&mut self, name: impl Into<String>, observer: Arc<dyn TaskObserver>) {
        self.observers.push((name.into(), observer));
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn fire_init(&self) {
        for (name, observer) in &self.observers {
            if let Err(e) = observer.on_init() {
                warn!(hook = %name, error = %e, "on_init hook failed");
            }
        }
    }

    pub fn fire_before_task(&self, task: &str) {
        for (name, observer) in &self.observers {
            if let Err(e) = observer.on_before_task(task) {
                warn!(hook = %name, task, error = %e, "on_before_task hook failed");
            }
        }
    }

    pub fn fire_after_task(&self, task: &str, outcome: TaskOutcome, exit_code: Option<i32>) {
        for (name, observer) in &self.observers {
            if let Err(e) = observer.on_after_task(task, outcome, exit_code) {
                warn!(hook = %name, task, error = %e, "on_after_task hook failed");
            }
        }
    }
}
