//! Scripted fakes for the capability traits, shared by unit tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use parlor_ai::{
    Content, Context, Message, MessageEventStream, Model, StopReason, Usage,
    providers::LlmProvider, stream::MessageEvent,
};

use crate::{
    capability::{BoxError, ContextRetriever, ResponseGenerator, Summarizer},
    checkpoint::{CheckpointStore, InMemoryStore, StoreError},
    persona::{PersonaDescriptor, StaticPersonaRegistry},
    state::ConversationState,
};

/// Stream a finished message the way a provider would: text deltas, then Done
fn message_stream(message: Message) -> MessageEventStream {
    Box::pin(async_stream::stream! {
        yield MessageEvent::Start { message: Message::assistant_with_content(vec![]) };
        let text = message.text();
        if !text.is_empty() {
            yield MessageEvent::TextStart { content_index: 0 };
            for chunk in text.split_inclusive(' ') {
                yield MessageEvent::TextDelta {
                    content_index: 0,
                    delta: chunk.to_string(),
                };
            }
        }
        let stop_reason = if message.tool_calls().is_empty() {
            StopReason::Stop
        } else {
            StopReason::ToolUse
        };
        yield MessageEvent::Done {
            message,
            stop_reason,
            usage: Usage::default(),
        };
    })
}

pub fn assistant(text: &str) -> Message {
    Message::assistant(text)
}

/// An assistant message with optional text and `(call_id, tool_name, arguments)` calls
pub fn with_tool_calls(text: &str, calls: &[(&str, &str, serde_json::Value)]) -> Message {
    let mut content = Vec::new();
    if !text.is_empty() {
        content.push(Content::text(text));
    }
    for (id, name, args) in calls {
        content.push(Content::tool_call(*id, *name, args.clone()));
    }
    Message::assistant_with_content(content)
}

pub fn persona(id: &str) -> PersonaDescriptor {
    match id {
        "nicolo" => PersonaDescriptor::new(
            "nicolo",
            "Nicolo",
            "A nervous witness who knows more than he says",
            "Evasive",
        ),
        "plato" => PersonaDescriptor::new("plato", "Plato", "An idealist", "Mystical"),
        other => PersonaDescriptor::new(other, other, "", ""),
    }
}

pub fn registry() -> StaticPersonaRegistry {
    StaticPersonaRegistry::new([persona("plato"), persona("nicolo"), persona("turing")])
}

/// One scripted generation outcome
pub enum Scripted {
    Reply(Message),
    /// `generate` itself fails
    Fail(String),
    /// The stream starts, then reports an error
    StreamError(String),
}

/// What the generator saw on one call
#[derive(Debug, Clone)]
pub struct GenerateCall {
    pub thread_id: String,
    pub message_count: usize,
    pub tool_names: Vec<String>,
    pub summary: String,
}

/// Replays scripted replies in order; answers "done" once exhausted
#[derive(Clone, Default)]
pub struct ScriptedGenerator {
    replies: Arc<Mutex<Vec<Scripted>>>,
    calls: Arc<Mutex<Vec<GenerateCall>>>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<Scripted>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies)),
            ..Default::default()
        }
    }

    pub fn replying(messages: Vec<Message>) -> Self {
        Self::new(messages.into_iter().map(Scripted::Reply).collect())
    }

    /// Sleep before answering, to widen race windows
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<GenerateCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ResponseGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        state: &ConversationState,
        tools: &[parlor_ai::Tool],
    ) -> parlor_ai::Result<MessageEventStream> {
        self.calls.lock().push(GenerateCall {
            thread_id: state.thread_id().to_string(),
            message_count: state.messages.len(),
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
            summary: state.summary.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = {
            let mut replies = self.replies.lock();
            if replies.is_empty() {
                Scripted::Reply(assistant("done"))
            } else {
                replies.remove(0)
            }
        };

        match next {
            Scripted::Reply(message) => Ok(message_stream(message)),
            Scripted::Fail(message) => Err(parlor_ai::Error::api("server_error", message)),
            Scripted::StreamError(message) => Ok(Box::pin(async_stream::stream! {
                yield MessageEvent::TextDelta { content_index: 0, delta: "partial ".into() };
                yield MessageEvent::Error { message };
            })),
        }
    }
}

/// Returns fixed text (or fails) and records queries
#[derive(Clone, Default)]
pub struct RecordingRetriever {
    response: Option<String>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl RecordingRetriever {
    pub fn new(response: &str) -> Self {
        Self {
            response: Some(response.to_string()),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl ContextRetriever for RecordingRetriever {
    async fn retrieve(&self, query: &str) -> Result<String, BoxError> {
        self.queries.lock().push(query.to_string());
        match &self.response {
            Some(text) => Ok(text.clone()),
            None => Err("index unavailable".into()),
        }
    }
}

/// Returns a fixed summary and records every call
#[derive(Clone, Default)]
pub struct RecordingSummarizer {
    summary: String,
    fail: bool,
    summarize_calls: Arc<Mutex<Vec<(usize, Option<String>)>>>,
    compress_calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingSummarizer {
    pub fn new(summary: &str) -> Self {
        Self {
            summary: summary.to_string(),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// `(message_count, prior_summary)` for each summarize call
    pub fn summarize_calls(&self) -> Vec<(usize, Option<String>)> {
        self.summarize_calls.lock().clone()
    }

    pub fn compress_calls(&self) -> Vec<String> {
        self.compress_calls.lock().clone()
    }
}

#[async_trait]
impl Summarizer for RecordingSummarizer {
    async fn summarize(
        &self,
        messages: &[Message],
        prior: Option<&str>,
    ) -> parlor_ai::Result<String> {
        self.summarize_calls
            .lock()
            .push((messages.len(), prior.map(str::to_string)));
        if self.fail {
            return Err(parlor_ai::Error::api("server_error", "summary model down"));
        }
        Ok(self.summary.clone())
    }

    async fn compress(&self, text: &str) -> parlor_ai::Result<String> {
        self.compress_calls.lock().push(text.to_string());
        if self.fail {
            return Err(parlor_ai::Error::api("server_error", "summary model down"));
        }
        Ok(format!("compressed: {}", text.chars().take(20).collect::<String>()))
    }
}

/// A store whose writes always fail
#[derive(Clone, Default)]
pub struct FailingStore {
    inner: InMemoryStore,
}

#[async_trait]
impl CheckpointStore for FailingStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, StoreError> {
        self.inner.load(thread_id).await
    }

    async fn save(&self, _state: &ConversationState) -> Result<(), StoreError> {
        Err(StoreError::Io(std::io::Error::other("disk full")))
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, StoreError> {
        self.inner.delete(thread_id).await
    }

    async fn delete_all(&self) -> Result<usize, StoreError> {
        self.inner.delete_all().await
    }
}

/// An [`LlmProvider`] replaying scripted results and recording each context
#[derive(Default)]
pub struct ScriptedProvider {
    results: Mutex<Vec<parlor_ai::Result<Message>>>,
    contexts: Mutex<Vec<Context>>,
}

impl ScriptedProvider {
    pub fn new(results: Vec<parlor_ai::Result<Message>>) -> Self {
        Self {
            results: Mutex::new(results),
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn contexts(&self) -> Vec<Context> {
        self.contexts.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn stream(&self, _model: &Model, context: &Context) -> parlor_ai::Result<MessageEventStream> {
        self.contexts.lock().push(context.clone());
        let next = {
            let mut results = self.results.lock();
            if results.is_empty() {
                Ok(assistant("done"))
            } else {
                results.remove(0)
            }
        };
        next.map(message_stream)
    }
}
