//! # lingo-graph - Checkpointed tutor workflow
//!
//! A small directed graph that advances one [`ConversationState`] per
//! invocation and persists it through [`lingo_checkpoint`]:
//!
//! ```text
//!  input + thread id
//!        │
//!        ▼
//!  ┌──────────┐  intent, current_agent   ┌──────────┐
//!  │  router  │ ───(pending writes)────▶ │  tutor   │ ──▶ checkpoint ──▶ END
//!  └──────────┘                          └──────────┘
//! ```
//!
//! Calling again with the same thread id resumes from the latest checkpoint,
//! so the message history accumulates across turns. Different thread ids
//! never see each other's state.
//!
//! ## Quick Start
//!
//! ```rust
//! use lingo_checkpoint::StoreConfig;
//! use lingo_graph::{build_tutor_workflow, BuildOptions, ConversationState, Intent, RunConfig};
//!
//! # fn main() -> lingo_graph::Result<()> {
//! let workflow = build_tutor_workflow(
//!     BuildOptions { testing: true, require_async: false },
//!     &StoreConfig::default(),
//! )?;
//!
//! let run = RunConfig::new("t1");
//! let state = workflow.invoke(ConversationState::from_user("Give me a grammar exercise"), &run)?;
//! assert_eq!(state.intent, Some(Intent::Exercise));
//!
//! let state = workflow.invoke(ConversationState::from_user("another one"), &run)?;
//! assert_eq!(state.messages.len(), 4);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod compiled;
pub mod error;
pub mod handlers;
pub mod node;
pub mod router;
pub mod state;
pub mod telemetry;
pub mod tutor;

pub use builder::{WorkflowBuilder, END};
pub use compiled::{CompiledWorkflow, RunConfig, StateSnapshot};
pub use error::{GraphError, Result};
pub use handlers::{Exercise, ExerciseSkill, Skill, TemplateSkill, TutorNode, TUTOR_NODE};
pub use node::{FnNode, Node};
pub use router::{IntentClassifier, KeywordClassifier, KeywordRule, RouterNode, ROUTER_NODE};
pub use state::{ConversationState, Intent, Message, Role, StateUpdate};
pub use tutor::{build_tutor_workflow, tutor_graph, BuildOptions};
