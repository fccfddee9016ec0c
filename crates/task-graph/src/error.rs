//! Error types for task graph operations.

use std::fmt;

/// Result type for task graph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or ordering the task graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A dependency cycle was detected in the graph.
    CycleDetected {
        /// Names of the tasks participating in (or blocked behind) the cycle.
        witness: Vec<String>,
    },

    /// One or more tasks depend on tasks that do not exist.
    MissingDependencies {
        /// List of (task, missing dependency) pairs.
        missing: Vec<(String, String)>,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CycleDetected { witness } => {
                write!(
                    f,
                    "cycle detected in task graph involving: {}",
                    witness.join(", ")
                )
            }
            Self::MissingDependencies { missing } => {
                let list = missing
                    .iter()
                    .map(|(task, dep)| format!("task '{task}' depends on missing task '{dep}'"))
                    .collect::<Vec<_>>()
                    .join("; ");
                write!(f, "{list}")
            }
        }
    }
}

impl std::error::Error for Error {}
