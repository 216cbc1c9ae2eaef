//! Workflow construction and compile-time checks
//!
//! [`WorkflowBuilder`] collects nodes and edges, then [`compile`] validates
//! the structure and negotiates the checkpoint backend:
//!
//! - exactly one entry node, and every node has an outgoing edge
//! - every edge target is a known node or [`END`]
//! - no cycles, and [`END`] is reachable from the entry
//! - the backend offers the requested [`ExecutionMode`]
//!
//! The capability check is what turns "async caller on a blocking-only
//! store" into a [`GraphError::Configuration`] before any node has run.
//!
//! ```rust
//! use lingo_checkpoint::{ExecutionMode, InMemoryCheckpointSaver};
//! use lingo_graph::{FnNode, StateUpdate, WorkflowBuilder};
//! use std::sync::Arc;
//!
//! # fn main() -> lingo_graph::Result<()> {
//! let mut builder = WorkflowBuilder::new();
//! builder
//!     .add_node(FnNode::new("echo", |_| Ok(StateUpdate::new())))
//!     .set_entry("echo")
//!     .set_finish("echo");
//!
//! let workflow = builder.compile(
//!     Arc::new(InMemoryCheckpointSaver::new()),
//!     ExecutionMode::Blocking,
//! )?;
//! assert_eq!(workflow.entry(), "echo");
//! # Ok(())
//! # }
//! ```
//!
//! [`compile`]: WorkflowBuilder::compile

use crate::compiled::CompiledWorkflow;
use crate::error::{GraphError, Result};
use crate::node::Node;
use crate::state::ConversationState;
use lingo_checkpoint::{CheckpointBackend, ExecutionMode, DEFAULT_NAMESPACE};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Terminal marker; an edge to `END` finishes the invocation
pub const END: &str = "__end__";

pub(crate) type PathFn = dyn Fn(&ConversationState) -> String + Send + Sync;

#[derive(Clone)]
pub(crate) enum Edge {
    Direct(String),
    Conditional {
        path: Arc<PathFn>,
        branches: HashMap<String, String>,
    },
}

impl Edge {
    fn targets(&self) -> Vec<&str> {
        match self {
            Edge::Direct(to) => vec![to.as_str()],
            Edge::Conditional { branches, .. } => branches.values().map(String::as_str).collect(),
        }
    }
}

#[derive(Default)]
pub struct WorkflowBuilder {
    nodes: HashMap<String, Arc<dyn Node>>,
    edges: HashMap<String, Edge>,
    entry: Option<String>,
    namespace: Option<String>,
    problems: Vec<String>,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: impl Node + 'static) -> &mut Self {
        self.add_shared_node(Arc::new(node))
    }

    pub fn add_shared_node(&mut self, node: Arc<dyn Node>) -> &mut Self {
        let name = node.name().to_string();
        if name == END || name.is_empty() {
            self.problems.push(format!("'{name}' is not a valid node name"));
        } else if self.nodes.insert(name.clone(), node).is_some() {
            self.problems.push(format!("node '{name}' added twice"));
        }
        self
    }

    pub fn set_entry(&mut self, name: impl Into<String>) -> &mut Self {
        self.entry = Some(name.into());
        self
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.insert_edge(from.into(), Edge::Direct(to.into()))
    }

    /// Route from `from` by looking `path(state)` up in `branches`
    pub fn add_conditional_edge<F>(
        &mut self,
        from: impl Into<String>,
        path: F,
        branches: HashMap<String, String>,
    ) -> &mut Self
    where
        F: Fn(&ConversationState) -> String + Send + Sync + 'static,
    {
        let edge = Edge::Conditional {
            path: Arc::new(path),
            branches,
        };
        self.insert_edge(from.into(), edge)
    }

    /// Shorthand for `add_edge(name, END)`
    pub fn set_finish(&mut self, name: impl Into<String>) -> &mut Self {
        self.add_edge(name, END)
    }

    /// Namespace checkpoints go under unless a run overrides it
    pub fn namespace(&mut self, namespace: impl Into<String>) -> &mut Self {
        self.namespace = Some(namespace.into());
        self
    }

    fn insert_edge(&mut self, from: String, edge: Edge) -> &mut Self {
        if self.edges.insert(from.clone(), edge).is_some() {
            self.problems
                .push(format!("node '{from}' has more than one outgoing edge"));
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(problem) = self.problems.first() {
            return Err(GraphError::Validation(problem.clone()));
        }

        let entry = self
            .entry
            .as_deref()
            .ok_or_else(|| GraphError::Validation("no entry node set".to_string()))?;
        if !self.nodes.contains_key(entry) {
            return Err(GraphError::Validation(format!(
                "entry node '{entry}' does not exist"
            )));
        }

        for name in self.nodes.keys() {
            if !self.edges.contains_key(name) {
                return Err(GraphError::Validation(format!(
                    "node '{name}' has no outgoing edge"
                )));
            }
        }

        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) {
                return Err(GraphError::Validation(format!(
                    "edge source '{from}' does not exist"
                )));
            }
            let targets = edge.targets();
            if targets.is_empty() {
                return Err(GraphError::Validation(format!(
                    "conditional edge from '{from}' has no branches"
                )));
            }
            for to in targets {
                if to != END && !self.nodes.contains_key(to) {
                    return Err(GraphError::Validation(format!(
                        "edge target '{to}' does not exist"
                    )));
                }
            }
        }

        self.check_acyclic(entry)
    }

    fn check_acyclic(&self, entry: &str) -> Result<()> {
        fn visit<'a>(
            builder: &'a WorkflowBuilder,
            node: &'a str,
            on_path: &mut HashSet<&'a str>,
            done: &mut HashSet<&'a str>,
            reaches_end: &mut bool,
        ) -> Result<()> {
            if node == END {
                *reaches_end = true;
                return Ok(());
            }
            if done.contains(node) {
                return Ok(());
            }
            if !on_path.insert(node) {
                return Err(GraphError::Validation(format!(
                    "cycle detected through '{node}'"
                )));
            }
            if let Some(edge) = builder.edges.get(node) {
                for next in edge.targets() {
                    visit(builder, next, on_path, done, reaches_end)?;
                }
            }
            on_path.remove(node);
            done.insert(node);
            Ok(())
        }

        let mut reaches_end = false;
        visit(
            self,
            entry,
            &mut HashSet::new(),
            &mut HashSet::new(),
            &mut reaches_end,
        )?;
        if !reaches_end {
            return Err(GraphError::Validation(format!(
                "'{END}' is unreachable from '{entry}'"
            )));
        }
        Ok(())
    }

    /// Validate the graph and bind it to `backend` for `mode` callers.
    pub fn compile(
        self,
        backend: Arc<dyn CheckpointBackend>,
        mode: ExecutionMode,
    ) -> Result<CompiledWorkflow> {
        self.validate()?;
        backend.require(mode)?;

        let entry = self.entry.unwrap_or_default();
        let namespace = self
            .namespace
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        tracing::debug!(
            backend = backend.name(),
            %mode,
            nodes = self.nodes.len(),
            %namespace,
            "workflow compiled"
        );

        Ok(CompiledWorkflow::new(
            self.nodes, self.edges, entry, namespace, backend, mode,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::FnNode;
    use crate::state::StateUpdate;
    use lingo_checkpoint::{InMemoryCheckpointSaver, SqliteCheckpointSaver};

    fn noop(name: &str) -> FnNode {
        FnNode::new(name, |_| Ok(StateUpdate::new()))
    }

    fn memory() -> Arc<dyn CheckpointBackend> {
        Arc::new(InMemoryCheckpointSaver::new())
    }

    fn validation_message(builder: &WorkflowBuilder) -> String {
        match builder.validate() {
            Err(GraphError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_linear_graph_compiles() {
        let mut builder = WorkflowBuilder::new();
        builder
            .add_node(noop("a"))
            .add_node(noop("b"))
            .set_entry("a")
            .add_edge("a", "b")
            .set_finish("b");
        let workflow = builder.compile(memory(), ExecutionMode::Blocking).unwrap();
        assert_eq!(workflow.entry(), "a");
        assert_eq!(workflow.namespace(), "default");
    }

    #[test]
    fn test_structural_errors() {
        let mut builder = WorkflowBuilder::new();
        builder.add_node(noop("a")).set_finish("a");
        assert!(validation_message(&builder).contains("no entry"));

        let mut builder = WorkflowBuilder::new();
        builder.add_node(noop("a")).set_entry("a");
        assert!(validation_message(&builder).contains("no outgoing edge"));

        let mut builder = WorkflowBuilder::new();
        builder.add_node(noop("a")).set_entry("a").add_edge("a", "ghost");
        assert!(validation_message(&builder).contains("ghost"));

        let mut builder = WorkflowBuilder::new();
        builder.add_node(noop("a")).add_node(noop("a")).set_entry("a");
        assert!(validation_message(&builder).contains("added twice"));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut builder = WorkflowBuilder::new();
        builder
            .add_node(noop("a"))
            .add_node(noop("b"))
            .set_entry("a")
            .add_edge("a", "b")
            .add_conditional_edge(
                "b",
                |_| "again".to_string(),
                HashMap::from([
                    ("again".to_string(), "a".to_string()),
                    ("done".to_string(), END.to_string()),
                ]),
            );
        assert!(validation_message(&builder).contains("cycle"));
    }

    #[test]
    fn test_blocking_only_backend_rejected_for_async() {
        let mut builder = WorkflowBuilder::new();
        builder.add_node(noop("a")).set_entry("a").set_finish("a");

        let sqlite = SqliteCheckpointSaver::open_in_memory().unwrap();
        let err = builder
            .compile(Arc::new(sqlite), ExecutionMode::Async)
            .err()
            .unwrap();
        match err {
            GraphError::Configuration(msg) => assert!(msg.contains("sqlite"), "{msg}"),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }
}
