//! Task graph builder using petgraph.
//!
//! Builds a directed acyclic graph from task definitions to handle
//! dependencies, detect cycles, and compute level-based execution order.

use crate::{Error, Result, TaskNodeData};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::IntoNodeReferences;
use petgraph::Direction;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// A node in the task graph.
#[derive(Debug, Clone)]
pub struct GraphNode<T> {
    /// Name of the task.
    pub name: String,
    /// The task data.
    pub task: T,
}

/// Task graph for dependency resolution and execution ordering.
///
/// Nodes are added in traversal order and that order is preserved inside
/// each execution level, which keeps scheduling deterministic.
pub struct TaskGraph<T: TaskNodeData> {
    /// The directed graph of tasks. Edges point dependency -> dependent.
    graph: DiGraph<GraphNode<T>, ()>,
    /// Map from task names to node indices.
    name_to_node: HashMap<String, NodeIndex>,
}

impl<T: TaskNodeData> TaskGraph<T> {
    /// Create a new empty task graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            name_to_node: HashMap::new(),
        }
    }

    /// Add a single task to the graph.
    ///
    /// If a task with the same name already exists, returns the existing
    /// node index.
    pub fn add_task(&mut self, name: &str, task: T) -> NodeIndex {
        if let Some(&node) = self.name_to_node.get(name) {
            return node;
        }

        let node_index = self.graph.add_node(GraphNode {
            name: name.to_string(),
            task,
        });
        self.name_to_node.insert(name.to_string(), node_index);
        debug!("added task node '{}'", name);

        node_index
    }

    /// Add dependency edges after all tasks have been added.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingDependencies`] if any task depends on a task
    /// that is not in the graph.
    pub fn add_dependency_edges(&mut self) -> Result<()> {
        let mut missing = Vec::new();
        let mut edges_to_add = Vec::new();

        for (node_index, node) in self.graph.node_references() {
            for dep_name in node.task.dependency_names() {
                if let Some(&dep_index) = self.name_to_node.get(dep_name) {
                    edges_to_add.push((dep_index, node_index));
                } else {
                    missing.push((node.name.clone(), dep_name.to_string()));
                }
            }
        }

        if !missing.is_empty() {
            return Err(Error::MissingDependencies { missing });
        }

        for (from, to) in edges_to_add {
            self.graph.add_edge(from, to, ());
        }

        Ok(())
    }

    /// Run a Kahn pass and return the names of nodes that never reach
    /// in-degree zero, or `None` when the graph is acyclic.
    ///
    /// The witness contains every node on or downstream of a cycle, which
    /// always includes the cycle members themselves.
    #[must_use]
    pub fn cycle_witness(&self) -> Option<Vec<String>> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                (
                    idx,
                    self.graph.neighbors_directed(idx, Direction::Incoming).count(),
                )
            })
            .collect();

        let mut queue: VecDeque<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx] == 0)
            .collect();
        let mut processed = 0usize;

        while let Some(idx) = queue.pop_front() {
            processed += 1;
            for succ in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(entry) = in_degree.get_mut(&succ) {
                    *entry -= 1;
                    if *entry == 0 {
                        queue.push_back(succ);
                    }
                }
            }
        }

        if processed == self.graph.node_count() {
            return None;
        }

        let mut witness: Vec<String> = in_degree
            .iter()
            .filter(|(_, deg)| **deg > 0)
            .map(|(idx, _)| self.graph[*idx].name.clone())
            .collect();
        witness.sort();
        Some(witness)
    }

    /// Check if the graph has cycles.
    #[must_use]
    pub fn has_cycles(&self) -> bool {
        self.cycle_witness().is_some()
    }

    /// Compute execution levels.
    ///
    /// Each level is the set of unprocessed tasks whose dependencies all
    /// live in earlier levels. Tasks inside a level are ordered by their
    /// insertion order, so the result is stable across runs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CycleDetected`] if the pass stalls before every
    /// node has been placed in a level.
    pub fn levelise(&self) -> Result<Vec<Vec<GraphNode<T>>>> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                (
                    idx,
                    self.graph.neighbors_directed(idx, Direction::Incoming).count(),
                )
            })
            .collect();

        let mut remaining = self.graph.node_count();
        let mut levels: Vec<Vec<GraphNode<T>>> = Vec::new();

        while remaining > 0 {
            // Node indices ascend in insertion order, which is the
            // requested traversal order.
            let mut ready: Vec<NodeIndex> = self
                .graph
                .node_indices()
                .filter(|idx| in_degree.get(idx) == Some(&0))
                .collect();
            ready.sort_by_key(|idx| idx.index());

            if ready.is_empty() {
                let witness = self
                    .cycle_witness()
                    .unwrap_or_else(|| vec!["<unknown>".to_string()]);
                return Err(Error::CycleDetected { witness });
            }

            for &idx in &ready {
                in_degree.remove(&idx);
                for succ in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                    if let Some(deg) = in_degree.get_mut(&succ) {
                        *deg = deg.saturating_sub(1);
                    }
                }
            }

            remaining -= ready.len();
            levels.push(ready.iter().map(|&idx| self.graph[idx].clone()).collect());
        }

        Ok(levels)
    }

    /// Get the number of tasks in the graph.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Check if a task exists in the graph.
    #[must_use]
    pub fn contains_task(&self, name: &str) -> bool {
        self.name_to_node.contains_key(name)
    }

    /// Get a reference to a task node by name.
    #[must_use]
    pub fn get_node_by_name(&self, name: &str) -> Option<&GraphNode<T>> {
        self.name_to_node
            .get(name)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    /// Build the graph for a set of requested tasks and their transitive
    /// dependencies.
    ///
    /// Tasks are visited breadth-first from the requested names, so
    /// insertion order (and therefore level order) follows the requested
    /// traversal order. Dependency names that `get_task` cannot resolve are
    /// reported by the edge pass.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingDependencies`] when a requested task or a
    /// dependency does not resolve.
    pub fn build_closure<F>(&mut self, requested: &[String], mut get_task: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<T>,
    {
        let mut queue: VecDeque<String> = requested.iter().cloned().collect();
        let mut missing = Vec::new();

        debug!("building graph closure for {:?}", requested);

        while let Some(current) = queue.pop_front() {
            if self.name_to_node.contains_key(&current) {
                continue;
            }

            let Some(task) = get_task(&current) else {
                missing.push(("<requested>".to_string(), current));
                continue;
            };

            let deps: Vec<String> = task.dependency_names().map(String::from).collect();
            self.add_task(&current, task);

            for dep in deps {
                if !self.name_to_node.contains_key(&dep) {
                    queue.push_back(dep);
                }
            }
        }

        if !missing.is_empty() {
            return Err(Error::MissingDependencies { missing });
        }

        self.add_dependency_edges()
    }
}

impl<T: TaskNodeData> Default for TaskGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}
