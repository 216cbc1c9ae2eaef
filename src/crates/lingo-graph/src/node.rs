//! Processing units of a workflow
//!
//! Nodes are pure: they read the current [`ConversationState`] and return a
//! [`StateUpdate`]. All I/O happens in the engine, which is what lets the same
//! graph run under a blocking or an async checkpoint store.

use crate::error::Result;
use crate::state::{ConversationState, StateUpdate};
use std::sync::Arc;

pub trait Node: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the engine snapshots state after this node.
    ///
    /// A non-persisting node's update is still applied; its fields are
    /// attached as pending writes to the next checkpoint instead.
    fn persists(&self) -> bool {
        true
    }

    fn run(&self, state: &ConversationState) -> Result<StateUpdate>;
}

type NodeFn = dyn Fn(&ConversationState) -> Result<StateUpdate> + Send + Sync;

/// Node backed by a closure
#[derive(Clone)]
pub struct FnNode {
    name: String,
    persists: bool,
    func: Arc<NodeFn>,
}

impl FnNode {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&ConversationState) -> Result<StateUpdate> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            persists: true,
            func: Arc::new(func),
        }
    }

    pub fn transient(mut self) -> Self {
        self.persists = false;
        self
    }
}

impl std::fmt::Debug for FnNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnNode")
            .field("name", &self.name)
            .field("persists", &self.persists)
            .finish_non_exhaustive()
    }
}

impl Node for FnNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn persists(&self) -> bool {
        self.persists
    }

    fn run(&self, state: &ConversationState) -> Result<StateUpdate> {
        (self.func)(state)
    }
}
