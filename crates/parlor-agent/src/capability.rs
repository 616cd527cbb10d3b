//! External capabilities the orchestrator consumes
//!
//! The core never talks to a model, index or database directly. Each step calls
//! one of these traits; adapters for real providers live in [`crate::provider`].

use async_trait::async_trait;
use parlor_ai::{Message, MessageEventStream};

use crate::state::ConversationState;

/// Boxed error for capabilities with no shared error type
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Produces the next assistant message for a conversation
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Stream the next assistant message.
    ///
    /// The stream must end with `MessageEvent::Done` carrying the full message,
    /// or `MessageEvent::Error`. Only `tools` may be offered to the model.
    async fn generate(
        &self,
        state: &ConversationState,
        tools: &[parlor_ai::Tool],
    ) -> parlor_ai::Result<MessageEventStream>;
}

/// Looks up background text for a query
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Return relevant text, or an empty string when nothing matches
    async fn retrieve(&self, query: &str) -> Result<String, BoxError>;
}

/// Folds history into a rolling summary and compresses retrieved text
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `messages`, extending `prior` when present
    async fn summarize(
        &self,
        messages: &[Message],
        prior: Option<&str>,
    ) -> parlor_ai::Result<String>;

    /// Compress a block of retrieved text
    async fn compress(&self, text: &str) -> parlor_ai::Result<String>;
}
