//! parlor-ai: Message model and streaming LLM provider layer
//!
//! This crate defines the provider-facing conversation types shared by the
//! orchestration core, the streaming event protocol, and an OpenAI-compatible
//! chat-completions provider.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use stream::MessageEventStream;
pub use types::*;
