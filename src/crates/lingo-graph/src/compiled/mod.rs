//! Executable workflows
//!
//! A [`CompiledWorkflow`] is a validated graph bound to one checkpoint
//! backend. Each invocation:
//!
//! 1. loads the latest checkpoint for the run's thread (if any) and folds the
//!    caller's input into it, so history accumulates across calls
//! 2. runs nodes from the entry until [`END`](crate::END), one at a time
//! 3. after each persisting node, commits the full state as a new checkpoint
//!    together with the pending writes of any transient nodes before it
//!
//! [`invoke`](CompiledWorkflow::invoke) drives a blocking store and
//! [`ainvoke`](CompiledWorkflow::ainvoke) an async one. A failed commit
//! aborts the invocation and leaves the previous latest checkpoint in place.

mod execution;
mod graph;
mod state;
mod types;

pub use graph::CompiledWorkflow;
pub use types::{RunConfig, StateSnapshot};
