//! The compiled workflow structure

use super::RunConfig;
use crate::builder::{Edge, END};
use crate::error::{GraphError, Result};
use crate::node::Node;
use crate::state::ConversationState;
use lingo_checkpoint::{
    AsyncCheckpointSaver, CheckpointBackend, CheckpointSaver, ExecutionMode, ThreadKey,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Validated graph bound to a checkpoint backend
///
/// Cheap to share behind an `Arc`; concurrent invocations on different
/// threads do not interfere.
pub struct CompiledWorkflow {
    pub(super) nodes: HashMap<String, Arc<dyn Node>>,
    pub(super) edges: HashMap<String, Edge>,
    pub(super) entry: String,
    pub(super) namespace: String,
    pub(super) backend: Arc<dyn CheckpointBackend>,
    pub(super) mode: ExecutionMode,
    ready: AtomicBool,
}

impl std::fmt::Debug for CompiledWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut nodes: Vec<&String> = self.nodes.keys().collect();
        nodes.sort();
        f.debug_struct("CompiledWorkflow")
            .field("nodes", &nodes)
            .field("entry", &self.entry)
            .field("namespace", &self.namespace)
            .field("backend", &self.backend.name())
            .field("mode", &self.mode)
            .finish()
    }
}

impl CompiledWorkflow {
    pub(crate) fn new(
        nodes: HashMap<String, Arc<dyn Node>>,
        edges: HashMap<String, Edge>,
        entry: String,
        namespace: String,
        backend: Arc<dyn CheckpointBackend>,
        mode: ExecutionMode,
    ) -> Self {
        Self {
            nodes,
            edges,
            entry,
            namespace,
            backend,
            mode,
            ready: AtomicBool::new(false),
        }
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn backend(&self) -> &Arc<dyn CheckpointBackend> {
        &self.backend
    }

    pub fn thread_key(&self, config: &RunConfig) -> ThreadKey {
        let namespace = config.namespace.as_deref().unwrap_or(&self.namespace);
        ThreadKey::new(namespace, config.thread_id.as_str())
    }

    pub(super) fn node(&self, name: &str) -> Result<&Arc<dyn Node>> {
        self.nodes
            .get(name)
            .ok_or_else(|| GraphError::Validation(format!("node '{name}' does not exist")))
    }

    /// Next node after `from`, or `None` at [`END`]
    pub(super) fn successor(
        &self,
        from: &str,
        state: &ConversationState,
    ) -> Result<Option<String>> {
        let to = match self.edges.get(from) {
            Some(Edge::Direct(to)) => to.clone(),
            Some(Edge::Conditional { path, branches }) => {
                let label = path(state);
                branches.get(&label).cloned().ok_or_else(|| {
                    GraphError::node(from, format!("no branch for route '{label}'"))
                })?
            }
            None => END.to_string(),
        };
        Ok((to != END).then_some(to))
    }

    pub(super) fn sync_store(&self) -> Result<&dyn CheckpointSaver> {
        self.backend.as_sync().ok_or_else(|| {
            GraphError::Configuration(format!(
                "the {} backend cannot be driven by a blocking invocation",
                self.backend.name()
            ))
        })
    }

    pub(super) fn async_store(&self) -> Result<&dyn AsyncCheckpointSaver> {
        self.backend.as_async().ok_or_else(|| {
            GraphError::Configuration(format!(
                "the {} backend cannot be driven by an async invocation",
                self.backend.name()
            ))
        })
    }

    /// Run backend setup once per workflow; repeats are harmless.
    pub(super) fn ensure_setup(&self, store: &dyn CheckpointSaver) -> Result<()> {
        if !self.ready.load(Ordering::Acquire) {
            store.setup()?;
            self.ready.store(true, Ordering::Release);
        }
        Ok(())
    }

    pub(super) async fn ensure_setup_async(&self, store: &dyn AsyncCheckpointSaver) -> Result<()> {
        if !self.ready.load(Ordering::Acquire) {
            store.setup().await?;
            self.ready.store(true, Ordering::Release);
        }
        Ok(())
    }
}
