//! parlor-agent: Turn orchestration for persona conversations
//!
//! This crate provides the state machine that routes each conversation turn
//! through response generation, tool branches, knowledge retrieval and history
//! compaction, backed by per-thread durable checkpoints.

pub mod capability;
pub mod checkpoint;
pub mod compaction;
pub mod error;
pub mod events;
pub mod locks;
pub mod orchestrator;
pub mod persona;
pub mod provider;
pub mod router;
pub mod state;
pub mod tool;

#[cfg(test)]
pub(crate) mod testing;

pub use capability::{BoxError, ContextRetriever, ResponseGenerator, Summarizer};
pub use checkpoint::{CheckpointStore, FileStore, InMemoryStore, StoreError};
pub use compaction::CompactionConfig;
pub use error::{Disposition, Error, ErrorReport, Result};
pub use events::TurnEvent;
pub use orchestrator::{
    Orchestrator, OrchestratorBuilder, OrchestratorConfig, ResetDetails, ResetOutcome,
    ResetScope, TurnEventStream, TurnOutcome,
};
pub use persona::{PersonaDescriptor, PersonaRegistry, StaticPersonaRegistry};
pub use provider::{ProviderGenerator, ProviderSummarizer, RetryConfig};
pub use router::{Route, route};
pub use state::{ConversationState, GameEvent};
pub use tool::{ToolId, ToolSet};
