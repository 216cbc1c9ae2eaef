//! Graph execution (invoke / ainvoke)
//!
//! Node scheduling is shared: an [`Execution`] advances through the graph and
//! hands back a [`Commit`] whenever state must be persisted. The blocking and
//! async drivers differ only in how they hand that commit to the store.

use super::{CompiledWorkflow, RunConfig};
use crate::error::{GraphError, Result};
use crate::state::ConversationState;
use lingo_checkpoint::{Checkpoint, CheckpointId, PendingWrite};
use serde_json::Value;

/// State that must be written before execution continues
pub(super) struct Commit {
    pub payload: Value,
    pub parent: Option<CheckpointId>,
    pub writes: Vec<PendingWrite>,
}

pub(super) struct Execution<'a> {
    workflow: &'a CompiledWorkflow,
    state: ConversationState,
    parent: Option<CheckpointId>,
    pending: Vec<PendingWrite>,
    next: Option<String>,
    commits: usize,
}

impl<'a> Execution<'a> {
    pub fn resume(
        workflow: &'a CompiledWorkflow,
        latest: Option<Checkpoint>,
        input: ConversationState,
    ) -> Result<Self> {
        let (mut state, parent) = match latest {
            Some(checkpoint) => {
                tracing::debug!(checkpoint_id = %checkpoint.id, "resuming from checkpoint");
                (ConversationState::from_payload(checkpoint.payload)?, Some(checkpoint.id))
            }
            None => (ConversationState::default(), None),
        };
        state.merge_input(input);

        Ok(Self {
            workflow,
            state,
            parent,
            pending: Vec::new(),
            next: Some(workflow.entry.clone()),
            commits: 0,
        })
    }

    /// Run nodes until one needs persisting. `None` means the run is done.
    pub fn advance(&mut self) -> Result<Option<Commit>> {
        let workflow = self.workflow;
        while let Some(name) = self.next.take() {
            let node = workflow.node(&name)?;
            let update = node.run(&self.state).map_err(|e| {
                tracing::error!(node = %name, error = %e, "node failed");
                match e {
                    GraphError::NodeExecution { .. } => e,
                    other => GraphError::node(name.as_str(), other),
                }
            })?;
            self.state = self.state.apply(&update)?;
            self.next = workflow.successor(&name, &self.state)?;

            if node.persists() {
                return self.commit().map(Some);
            }
            self.pending.extend(
                update
                    .into_fields()
                    .into_iter()
                    .map(|(channel, value)| PendingWrite::new(name.as_str(), channel, value)),
            );
        }

        // Writes from a trailing transient node still need a home.
        if !self.pending.is_empty() {
            return self.commit().map(Some);
        }
        Ok(None)
    }

    fn commit(&mut self) -> Result<Commit> {
        Ok(Commit {
            payload: self.state.to_payload()?,
            parent: self.parent,
            writes: std::mem::take(&mut self.pending),
        })
    }

    pub fn committed(&mut self, id: CheckpointId) {
        self.parent = Some(id);
        self.commits += 1;
    }

    pub fn finish(self) -> (ConversationState, usize) {
        (self.state, self.commits)
    }
}

impl CompiledWorkflow {
    /// Run one turn against a blocking checkpoint store.
    ///
    /// Resumes from the thread's latest checkpoint, appends `input`, and
    /// returns the final state after the last commit.
    #[tracing::instrument(
        name = "invoke",
        skip(self, input, config),
        fields(thread_id = %config.thread_id, namespace = %self.thread_key(config).namespace)
    )]
    pub fn invoke(&self, input: ConversationState, config: &RunConfig) -> Result<ConversationState> {
        let store = self.sync_store()?;
        self.ensure_setup(store)?;
        let key = self.thread_key(config);

        let latest = store.get_latest(&key)?;
        let mut run = Execution::resume(self, latest, input)?;
        while let Some(commit) = run.advance()? {
            let id = store
                .put_with_writes(&key, commit.payload, commit.parent, commit.writes)
                .map_err(|e| {
                    tracing::error!(error = %e, "checkpoint write failed");
                    e
                })?;
            run.committed(id);
        }

        let (state, commits) = run.finish();
        tracing::info!(commits, "invocation finished");
        Ok(state)
    }

    /// Async counterpart of [`invoke`](Self::invoke)
    #[tracing::instrument(
        name = "ainvoke",
        skip(self, input, config),
        fields(thread_id = %config.thread_id, namespace = %self.thread_key(config).namespace)
    )]
    pub async fn ainvoke(
        &self,
        input: ConversationState,
        config: &RunConfig,
    ) -> Result<ConversationState> {
        let store = self.async_store()?;
        self.ensure_setup_async(store).await?;
        let key = self.thread_key(config);

        let latest = store.get_latest(&key).await?;
        let mut run = Execution::resume(self, latest, input)?;
        while let Some(commit) = run.advance()? {
            let id = store
                .put_with_writes(&key, commit.payload, commit.parent, commit.writes)
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "checkpoint write failed");
                    e
                })?;
            run.committed(id);
        }

        let (state, commits) = run.finish();
        tracing::info!(commits, "invocation finished");
        Ok(state)
    }
}
