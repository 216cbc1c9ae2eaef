//! State inspection (get_state, history)

use super::{CompiledWorkflow, RunConfig, StateSnapshot};
use crate::error::Result;
use crate::state::ConversationState;
use futures::TryStreamExt;
use lingo_checkpoint::{Checkpoint, PendingWrite};

fn snapshot(checkpoint: Checkpoint, writes: Vec<PendingWrite>) -> Result<StateSnapshot> {
    Ok(StateSnapshot {
        checkpoint_id: checkpoint.id,
        parent_id: checkpoint.parent_id,
        written_at: checkpoint.written_at,
        state: ConversationState::from_payload(checkpoint.payload)?,
        writes,
    })
}

impl CompiledWorkflow {
    /// Latest state of a thread, or `None` if it has never run (or expired)
    pub fn get_state(&self, config: &RunConfig) -> Result<Option<StateSnapshot>> {
        let store = self.sync_store()?;
        let key = self.thread_key(config);
        let Some(checkpoint) = store.get_latest(&key)? else {
            return Ok(None);
        };
        let writes = store.get_writes(&key, checkpoint.id)?;
        snapshot(checkpoint, writes).map(Some)
    }

    /// Every stored state of a thread, oldest first
    pub fn history(&self, config: &RunConfig) -> Result<Vec<StateSnapshot>> {
        let store = self.sync_store()?;
        let key = self.thread_key(config);
        let mut snapshots = Vec::new();
        for checkpoint in store.list(&key)? {
            let checkpoint = checkpoint?;
            let writes = store.get_writes(&key, checkpoint.id)?;
            snapshots.push(snapshot(checkpoint, writes)?);
        }
        Ok(snapshots)
    }

    pub async fn aget_state(&self, config: &RunConfig) -> Result<Option<StateSnapshot>> {
        let store = self.async_store()?;
        let key = self.thread_key(config);
        let Some(checkpoint) = store.get_latest(&key).await? else {
            return Ok(None);
        };
        let writes = store.get_writes(&key, checkpoint.id).await?;
        snapshot(checkpoint, writes).map(Some)
    }

    pub async fn ahistory(&self, config: &RunConfig) -> Result<Vec<StateSnapshot>> {
        let store = self.async_store()?;
        let key = self.thread_key(config);
        let checkpoints: Vec<Checkpoint> = store.list(&key).await?.try_collect().await?;

        let mut snapshots = Vec::with_capacity(checkpoints.len());
        for checkpoint in checkpoints {
            let writes = store.get_writes(&key, checkpoint.id).await?;
            snapshots.push(snapshot(checkpoint, writes)?);
        }
        Ok(snapshots)
    }
}
