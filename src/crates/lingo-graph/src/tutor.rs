//! The tutor workflow: `router -> tutor -> END`
//!
//! [`build_tutor_workflow`] is the build entry point the hosting process
//! calls. Its [`BuildOptions`] pick the backend (volatile for tests, the
//! configured store otherwise) and the execution mode the caller needs;
//! asking for async execution on a blocking-only store fails here, before
//! any message is handled.

use crate::builder::WorkflowBuilder;
use crate::compiled::CompiledWorkflow;
use crate::error::Result;
use crate::handlers::{TutorNode, TUTOR_NODE};
use crate::router::{IntentClassifier, KeywordClassifier, RouterNode, ROUTER_NODE};
use lingo_checkpoint::{CheckpointBackend, ExecutionMode, InMemoryCheckpointSaver, StoreConfig};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Use a fresh volatile store instead of the configured backend
    pub testing: bool,
    /// The caller will use `ainvoke`
    pub require_async: bool,
}

impl BuildOptions {
    pub fn mode(&self) -> ExecutionMode {
        if self.require_async {
            ExecutionMode::Async
        } else {
            ExecutionMode::Blocking
        }
    }
}

/// Router and tutor wired together, ready to compile
pub fn tutor_graph(classifier: Arc<dyn IntentClassifier>, tutor: TutorNode) -> WorkflowBuilder {
    let mut builder = WorkflowBuilder::new();
    builder
        .add_node(RouterNode::new(classifier, TUTOR_NODE))
        .add_node(tutor)
        .set_entry(ROUTER_NODE)
        .add_edge(ROUTER_NODE, TUTOR_NODE)
        .set_finish(TUTOR_NODE);
    builder
}

/// Build the default tutor workflow against `config`.
pub fn build_tutor_workflow(options: BuildOptions, config: &StoreConfig) -> Result<CompiledWorkflow> {
    let backend: Arc<dyn CheckpointBackend> = if options.testing {
        Arc::new(InMemoryCheckpointSaver::new())
    } else {
        config.open_backend()?
    };

    tracing::info!(
        backend = backend.name(),
        mode = %options.mode(),
        namespace = %config.namespace,
        "building tutor workflow"
    );

    let mut builder = tutor_graph(Arc::new(KeywordClassifier::new()?), TutorNode::new());
    builder.namespace(config.namespace.clone());
    builder.compile(backend, options.mode())
}
