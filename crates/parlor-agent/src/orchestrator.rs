//! The turn state machine
//!
//! A turn loads the thread's state, appends the user message and walks the
//! step graph until it reaches Done:
//!
//! ```text
//! Generate -> Retrieve -> SummarizeContext -> Generate
//!          -> ToolBranch -> Generate
//!          -> Continue -> Compact -> Done
//! ```
//!
//! The state is persisted only when Done is reached, so a failed turn leaves
//! the previous checkpoint untouched.

use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use parlor_ai::{Message, stream::MessageEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::{Stream, wrappers::UnboundedReceiverStream};
use tokio_util::sync::CancellationToken;

use crate::{
    capability::{ContextRetriever, ResponseGenerator, Summarizer},
    checkpoint::{CheckpointStore, InMemoryStore},
    compaction::{self, CompactionConfig},
    error::{Error, Result},
    events::TurnEvent,
    locks::ThreadLocks,
    persona::{PersonaDescriptor, PersonaRegistry},
    router::{Route, route_with},
    state::{ConversationState, GameEvent},
    tool::{SchemaCache, ToolId, ToolSet, VICTORY_RESULT},
};

/// Tool result used when retrieval finds nothing
const NO_CONTEXT: &str = "No relevant context found.";

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// History compaction policy
    pub compaction: CompactionConfig,
    /// Maximum generation steps per turn
    pub max_steps: usize,
    /// Compress retrieved text before it enters the prompt
    pub compress_retrieved_context: bool,
    /// Personas that are offered the victory tool
    pub event_personas: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            compaction: CompactionConfig::default(),
            max_steps: 25,
            compress_retrieved_context: true,
            event_personas: vec!["nicolo".to_string()],
        }
    }
}

/// Result of a committed turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The last message the persona generated
    pub assistant_message: Message,
    /// The state as persisted
    pub state: ConversationState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetScope {
    Thread,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetDetails {
    pub scope: ResetScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub threads_deleted: usize,
}

/// Result of a reset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetOutcome {
    /// Whether any checkpoint existed and was removed
    pub deleted: bool,
    pub details: ResetDetails,
}

/// A stream of turn events
pub type TurnEventStream = Pin<Box<dyn Stream<Item = TurnEvent> + Send>>;

/// Steps of the turn graph
#[derive(Debug)]
enum Step {
    Generate,
    Retrieve {
        call_id: String,
        arguments: serde_json::Value,
    },
    SummarizeContext {
        index: usize,
    },
    ToolBranch {
        tool: ToolId,
        call_id: String,
    },
    Continue,
    Compact,
    Done,
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::Generate => "generate",
            Step::Retrieve { .. } => "retrieve",
            Step::SummarizeContext { .. } => "summarize_context",
            Step::ToolBranch { .. } => "tool_branch",
            Step::Continue => "continue",
            Step::Compact => "compact",
            Step::Done => "done",
        }
    }
}

/// Optional sink for turn events
#[derive(Clone, Default)]
struct Emitter {
    tx: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl Emitter {
    fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

struct Inner {
    generator: Arc<dyn ResponseGenerator>,
    retriever: Arc<dyn ContextRetriever>,
    summarizer: Arc<dyn Summarizer>,
    context_summarizer: Arc<dyn Summarizer>,
    store: Arc<dyn CheckpointStore>,
    registry: Arc<dyn PersonaRegistry>,
    locks: ThreadLocks,
    schemas: SchemaCache,
    config: OrchestratorConfig,
}

/// Runs conversation turns.
///
/// Build one per process with [`Orchestrator::builder`] and share it; cloning
/// is cheap.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

/// Builder for [`Orchestrator`]
#[derive(Default)]
pub struct OrchestratorBuilder {
    generator: Option<Arc<dyn ResponseGenerator>>,
    retriever: Option<Arc<dyn ContextRetriever>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    context_summarizer: Option<Arc<dyn Summarizer>>,
    store: Option<Arc<dyn CheckpointStore>>,
    registry: Option<Arc<dyn PersonaRegistry>>,
    config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    pub fn generator(mut self, generator: Arc<dyn ResponseGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn retriever(mut self, retriever: Arc<dyn ContextRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Conversation summarizer
    pub fn summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Summarizer for retrieved context. Defaults to the conversation summarizer.
    pub fn context_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.context_summarizer = Some(summarizer);
        self
    }

    /// Checkpoint store. Defaults to an [`InMemoryStore`].
    pub fn store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn PersonaRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        self.config.compaction.validate()?;
        if self.config.max_steps == 0 {
            return Err(Error::Config("max_steps must be at least 1".into()));
        }

        let generator = self
            .generator
            .ok_or_else(|| Error::Config("a response generator is required".into()))?;
        let retriever = self
            .retriever
            .ok_or_else(|| Error::Config("a context retriever is required".into()))?;
        let summarizer = self
            .summarizer
            .ok_or_else(|| Error::Config("a summarizer is required".into()))?;
        let registry = self
            .registry
            .ok_or_else(|| Error::Config("a persona registry is required".into()))?;
        let context_summarizer = self
            .context_summarizer
            .unwrap_or_else(|| Arc::clone(&summarizer));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));

        Ok(Orchestrator {
            inner: Arc::new(Inner {
                generator,
                retriever,
                summarizer,
                context_summarizer,
                store,
                registry,
                locks: ThreadLocks::new(),
                schemas: SchemaCache::new(),
                config: self.config,
            }),
        })
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<dyn PersonaRegistry> {
        &self.inner.registry
    }

    /// Run one turn and wait for it to commit
    pub async fn run_turn(
        &self,
        thread_id: &str,
        user_message: &str,
        persona: &PersonaDescriptor,
    ) -> Result<TurnOutcome> {
        self.run_turn_with_cancel(thread_id, user_message, persona, CancellationToken::new())
            .await
    }

    /// Run one turn with a cancellation token.
    ///
    /// Cancellation is honoured only until the turn makes its first external
    /// call; after that the turn runs to completion and persists. The turn runs
    /// on its own task, so dropping the returned future does not abort it.
    pub async fn run_turn_with_cancel(
        &self,
        thread_id: &str,
        user_message: &str,
        persona: &PersonaDescriptor,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome> {
        let this = self.clone();
        let thread_id = thread_id.to_string();
        let user_message = user_message.to_string();
        let persona = persona.clone();

        let task = tokio::spawn(async move {
            this.execute(thread_id, user_message, persona, cancel, Emitter::default())
                .await
        });

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(Error::Cancelled),
        }
    }

    /// Run one turn, streaming its events.
    ///
    /// The stream ends with exactly one `TurnEnd` or `Error` event.
    pub fn run_turn_stream(
        &self,
        thread_id: &str,
        user_message: &str,
        persona: &PersonaDescriptor,
        cancel: CancellationToken,
    ) -> TurnEventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = Emitter { tx: Some(tx) };

        let this = self.clone();
        let thread_id = thread_id.to_string();
        let user_message = user_message.to_string();
        let persona = persona.clone();

        tokio::spawn(async move {
            let result = this
                .execute(thread_id, user_message, persona, cancel, emitter.clone())
                .await;
            match result {
                Ok(outcome) => emitter.emit(TurnEvent::TurnEnd {
                    assistant_message: outcome.assistant_message,
                    state: outcome.state,
                }),
                Err(e) => emitter.emit(TurnEvent::Error { report: e.report() }),
            }
        });

        Box::pin(UnboundedReceiverStream::new(rx))
    }

    /// Load a thread's committed state
    pub async fn load_state(&self, thread_id: &str) -> Result<Option<ConversationState>> {
        Ok(self.inner.store.load(thread_id).await?)
    }

    /// Delete one thread's checkpoint, or every checkpoint when `thread_id` is `None`.
    /// Resetting a thread that does not exist is not an error.
    pub async fn reset(&self, thread_id: Option<&str>) -> Result<ResetOutcome> {
        match thread_id {
            Some(thread_id) => {
                let _guard = self.inner.locks.acquire(thread_id).await;
                let deleted = self.inner.store.delete(thread_id).await?;
                tracing::info!("Reset thread {} (deleted: {})", thread_id, deleted);
                Ok(ResetOutcome {
                    deleted,
                    details: ResetDetails {
                        scope: ResetScope::Thread,
                        thread_id: Some(thread_id.to_string()),
                        threads_deleted: usize::from(deleted),
                    },
                })
            }
            None => {
                // Waits out running turns so none can save after the wipe
                let _guard = self.inner.locks.acquire_all().await;
                let count = self.inner.store.delete_all().await?;
                tracing::info!("Reset all threads ({} deleted)", count);
                Ok(ResetOutcome {
                    deleted: count > 0,
                    details: ResetDetails {
                        scope: ResetScope::All,
                        thread_id: None,
                        threads_deleted: count,
                    },
                })
            }
        }
    }

    /// Reject malformed input and unknown personas before any external call.
    /// Blank descriptor fields are filled from the registry.
    fn validate(
        &self,
        thread_id: &str,
        user_message: &str,
        persona: &PersonaDescriptor,
    ) -> Result<PersonaDescriptor> {
        if thread_id.trim().is_empty() {
            return Err(Error::InvalidTurnInput("thread id must not be empty".into()));
        }
        if user_message.trim().is_empty() {
            return Err(Error::InvalidTurnInput("message must not be empty".into()));
        }
        let registered = self
            .inner
            .registry
            .get(&persona.id)
            .ok_or_else(|| Error::UnknownPersona(persona.id.clone()))?;

        let pick = |given: &str, fallback: String| {
            if given.trim().is_empty() {
                fallback
            } else {
                given.to_string()
            }
        };
        Ok(PersonaDescriptor {
            id: registered.id,
            name: pick(&persona.name, registered.name),
            perspective: pick(&persona.perspective, registered.perspective),
            style: pick(&persona.style, registered.style),
        })
    }

    async fn execute(
        self,
        thread_id: String,
        user_message: String,
        persona: PersonaDescriptor,
        cancel: CancellationToken,
        emitter: Emitter,
    ) -> Result<TurnOutcome> {
        let persona = self.validate(&thread_id, &user_message, &persona)?;

        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            guard = self.inner.locks.acquire(&thread_id) => guard,
        };
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        emitter.emit(TurnEvent::TurnStart {
            thread_id: thread_id.clone(),
        });

        let mut state = self
            .inner
            .store
            .load(&thread_id)
            .await?
            .unwrap_or_else(|| ConversationState::new(thread_id.as_str()));
        state.apply_persona(&persona);
        state.game_event = None;
        state.messages.push(Message::user(user_message));

        let tools = ToolSet::for_persona(&persona.id, &self.inner.config.event_personas);
        let assistant_message = self.run_graph(&mut state, &tools, &emitter).await?;

        state.version += 1;
        self.inner.store.save(&state).await?;
        tracing::info!(
            "Committed turn on thread {} (version {}, {} messages)",
            thread_id,
            state.version,
            state.messages.len()
        );

        Ok(TurnOutcome {
            assistant_message,
            state,
        })
    }

    /// Walk the step graph. Returns the last generated message.
    async fn run_graph(
        &self,
        state: &mut ConversationState,
        tools: &ToolSet,
        emitter: &Emitter,
    ) -> Result<Message> {
        let config = &self.inner.config;
        let mut step = Step::Generate;
        let mut generations = 0usize;
        let mut last_generated: Option<Message> = None;

        loop {
            tracing::debug!("Thread {}: step {}", state.thread_id(), step.name());

            step = match step {
                Step::Generate => {
                    generations += 1;
                    if generations > config.max_steps {
                        return Err(Error::StepLimitExceeded {
                            max_steps: config.max_steps,
                        });
                    }
                    emitter.emit(TurnEvent::StepStart { step: generations });

                    let message = self.generate(state, tools, emitter).await?;
                    let route = route_with(&message, tools);

                    let fired_victory = message
                        .tool_calls()
                        .iter()
                        .any(|call| tools.resolve(call.name) == Some(ToolId::TriggerVictory));
                    if fired_victory && state.raise_event(GameEvent::Victory) {
                        emitter.emit(TurnEvent::GameEvent {
                            event: GameEvent::Victory,
                        });
                    }

                    state.messages.push(message.clone());
                    emitter.emit(TurnEvent::MessageEnd {
                        message: message.clone(),
                    });
                    self.answer_unhandled_calls(state, &message, &route, tools, emitter);
                    last_generated = Some(message);

                    match route {
                        Route::Retrieve { call_id, arguments } => {
                            Step::Retrieve { call_id, arguments }
                        }
                        Route::ToolBranch { tool, call_id } => Step::ToolBranch { tool, call_id },
                        Route::Continue => Step::Continue,
                    }
                }

                Step::Retrieve { call_id, arguments } => {
                    let tool_name = ToolId::RetrieveContext.name();
                    if let Some(err) = self
                        .inner
                        .schemas
                        .validate(ToolId::RetrieveContext, &arguments)
                    {
                        tracing::warn!("Invalid {} arguments: {}", tool_name, err);
                        emitter.emit(TurnEvent::ToolCallSkipped {
                            tool_call_id: call_id.clone(),
                            tool_name: tool_name.to_string(),
                            reason: err.clone(),
                        });
                        state
                            .messages
                            .push(Message::tool_result(call_id, tool_name, err, true));
                        Step::Generate
                    } else {
                        let query = arguments
                            .get("query")
                            .and_then(|q| q.as_str())
                            .unwrap_or_default();
                        let text = self
                            .inner
                            .retriever
                            .retrieve(query)
                            .await
                            .map_err(|e| Error::Retrieval(e.to_string()))?;

                        if text.trim().is_empty() {
                            state
                                .messages
                                .push(Message::tool_result(call_id, tool_name, NO_CONTEXT, false));
                            Step::Generate
                        } else {
                            state
                                .messages
                                .push(Message::tool_result(call_id, tool_name, text, false));
                            if config.compress_retrieved_context {
                                Step::SummarizeContext {
                                    index: state.messages.len() - 1,
                                }
                            } else {
                                Step::Generate
                            }
                        }
                    }
                }

                Step::SummarizeContext { index } => {
                    let retrieved = state.messages[index].text();
                    let compressed = self
                        .inner
                        .context_summarizer
                        .compress(&retrieved)
                        .await
                        .map_err(|e| Error::Summarization(e.to_string()))?;
                    if compressed.trim().is_empty() {
                        return Err(Error::Summarization(
                            "context compression returned no text".into(),
                        ));
                    }
                    state.messages[index].replace_text(compressed.trim());
                    Step::Generate
                }

                Step::ToolBranch { tool, call_id } => {
                    // The victory flag was already raised in Generate
                    state
                        .messages
                        .push(Message::tool_result(call_id, tool.name(), VICTORY_RESULT, false));
                    Step::Generate
                }

                Step::Continue => Step::Compact,

                Step::Compact => {
                    let before = state.messages.len();
                    if config.compaction.should_compact(before) {
                        emitter.emit(TurnEvent::CompactionStart {
                            messages_before: before,
                        });
                        let compacted = compaction::compact(
                            state,
                            &config.compaction,
                            self.inner.summarizer.as_ref(),
                        )
                        .await?;
                        if let Some(compacted) = compacted {
                            state.messages = compacted.messages;
                            state.summary = compacted.summary;
                        }
                        emitter.emit(TurnEvent::CompactionEnd {
                            messages_before: before,
                            messages_after: state.messages.len(),
                        });
                    }
                    Step::Done
                }

                Step::Done => {
                    return last_generated.ok_or_else(|| {
                        Error::UpstreamGeneration("turn produced no assistant message".into())
                    });
                }
            };
        }
    }

    /// Stream one generation, forwarding text deltas
    async fn generate(
        &self,
        state: &ConversationState,
        tools: &ToolSet,
        emitter: &Emitter,
    ) -> Result<Message> {
        let mut stream = self
            .inner
            .generator
            .generate(state, &tools.api_tools())
            .await
            .map_err(|e| Error::UpstreamGeneration(e.to_string()))?;

        while let Some(event) = stream.next().await {
            match event {
                MessageEvent::TextDelta { delta, .. } => {
                    emitter.emit(TurnEvent::TextDelta { delta });
                }
                MessageEvent::Done { message, .. } => {
                    if !message.is_assistant() {
                        return Err(Error::UpstreamGeneration(format!(
                            "generator returned a {} message",
                            message.role()
                        )));
                    }
                    return Ok(message);
                }
                MessageEvent::Error { message } => {
                    return Err(Error::UpstreamGeneration(message));
                }
                _ => {}
            }
        }

        Err(Error::UpstreamGeneration(
            "stream ended without a final message".into(),
        ))
    }

    /// Give every tool call the route does not handle an error result, so each
    /// call in the history has exactly one answer.
    fn answer_unhandled_calls(
        &self,
        state: &mut ConversationState,
        message: &Message,
        route: &Route,
        tools: &ToolSet,
        emitter: &Emitter,
    ) {
        let handled = route.call_id();
        for call in message.tool_calls() {
            if Some(call.id) == handled {
                continue;
            }
            let reason = if tools.resolve(call.name).is_some() {
                "another tool call was handled first"
            } else {
                "unknown tool"
            };
            tracing::warn!("Skipping tool call {} ({}): {}", call.id, call.name, reason);
            emitter.emit(TurnEvent::ToolCallSkipped {
                tool_call_id: call.id.to_string(),
                tool_name: call.name.to_string(),
                reason: reason.to_string(),
            });
            state.messages.push(Message::tool_result(
                call.id,
                call.name,
                format!("Tool call not executed: {}", reason),
                true,
            ));
        }
    }
}
