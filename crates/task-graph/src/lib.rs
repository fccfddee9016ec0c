//! Task graph DAG algorithms and dependency resolution for zr.
//!
//! This crate provides a directed acyclic graph (DAG) implementation for
//! task dependency resolution and level-based execution ordering using
//! petgraph.
//!
//! # Key Types
//!
//! - [`TaskGraph`]: the graph structure for building and querying task
//!   dependencies
//! - [`TaskNodeData`]: trait that task types must implement to be stored in
//!   the graph
//! - [`GraphNode`]: a node in the graph containing the task name and data
//!
//! # Example
//!
//! ```ignore
//! use zr_task_graph::{TaskGraph, TaskNodeData};
//!
//! let mut graph = TaskGraph::new();
//! graph.add_task("build", my_task);
//! graph.add_task("test", task_depending_on_build);
//! graph.add_dependency_edges()?;
//!
//! for level in graph.levelise()? {
//!     // tasks within a level are safe to run in parallel
//! }
//! ```

mod error;
mod graph;

pub use error::{Error, Result};
pub use graph::{GraphNode, TaskGraph};

/// Trait for task data that can be stored in the task graph.
///
/// Implement this trait for your task type to enable it to be stored in a
/// [`TaskGraph`] and participate in dependency resolution.
pub trait TaskNodeData: Clone {
    /// Returns the names of tasks this task depends on.
    fn dependency_names(&self) -> impl Iterator<Item = &str>;
}
