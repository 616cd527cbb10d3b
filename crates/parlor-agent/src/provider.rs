//! Capability adapters backed by an LLM provider

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parlor_ai::{
    Context, Message, MessageEventStream, Model, providers::LlmProvider, stream::MessageEvent,
};

use crate::{
    capability::{ResponseGenerator, Summarizer},
    compaction::transcript,
    state::ConversationState,
};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Fallback for errors wrapped into strings by lower layers
fn is_retryable_message(error: &str) -> bool {
    let lower = error.to_lowercase();
    ["429", "rate limit", "timeout", "connection", "500", "502", "503", "504", "overloaded"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Open a provider stream, retrying retryable failures with backoff.
/// Failures after the stream has started are not retried.
async fn stream_with_retry(
    provider: &dyn LlmProvider,
    model: &Model,
    context: &Context,
    retry: &RetryConfig,
) -> parlor_ai::Result<MessageEventStream> {
    let mut attempt = 0u32;
    loop {
        match provider.stream(model, context).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                let error_msg = e.to_string();
                let retryable = e.is_retryable() || is_retryable_message(&error_msg);
                if attempt < retry.max_retries && retryable {
                    let delay = retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                        attempt + 1,
                        retry.max_retries + 1,
                        error_msg,
                        delay
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(e);
            }
        }
    }
}

/// Drain a stream into the final message's text
async fn collect_text(mut stream: MessageEventStream) -> parlor_ai::Result<String> {
    while let Some(event) = stream.next().await {
        match event {
            MessageEvent::Done { message, .. } => return Ok(message.text()),
            MessageEvent::Error { message } => {
                return Err(parlor_ai::Error::api("stream_error", message));
            }
            _ => {}
        }
    }
    Err(parlor_ai::Error::UnexpectedResponse(
        "stream ended without a final message".into(),
    ))
}

/// Drop tool results at the head of history whose call was compacted away
fn without_orphaned_results(messages: &[Message]) -> Vec<Message> {
    let start = messages
        .iter()
        .position(|m| !matches!(m, Message::ToolResult { .. }))
        .unwrap_or(messages.len());
    messages[start..].to_vec()
}

/// Render the persona's system prompt
pub fn character_card(state: &ConversationState) -> String {
    let name = &state.persona_name;
    let mut card = format!(
        "Let's play a role-playing game. You are {name}, a real person talking with another \
         individual. Stay in character at all times and answer in short sentences, explaining \
         your ideas concisely but in an engaging way.\n\n\
         Name: {name}\n\
         Perspective: {perspective}\n\
         Talking style: {style}\n\n\
         Rules:\n\
         - Never mention that you are an AI or a virtual assistant.\n\
         - If this is the first time you speak with the user, introduce yourself as {name}.\n\
         - Reply in plain text, without formatting marks or meta-commentary.\n\
         - Keep every reply under 150 characters.\n",
        name = name,
        perspective = state.persona_perspective,
        style = state.persona_style,
    );

    if !state.summary.is_empty() {
        card.push_str(&format!(
            "\nSummary of the conversation so far between {} and the user:\n{}\n",
            name, state.summary
        ));
    }

    card.push_str("\nThe conversation between you and the user starts now.");
    card
}

/// [`ResponseGenerator`] backed by a chat-completions provider
pub struct ProviderGenerator {
    provider: Arc<dyn LlmProvider>,
    model: Model,
    retry: RetryConfig,
}

impl ProviderGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, model: Model) -> Self {
        Self {
            provider,
            model,
            retry: RetryConfig::default(),
        }
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn build_context(&self, state: &ConversationState, tools: &[parlor_ai::Tool]) -> Context {
        Context {
            system_prompt: Some(character_card(state)),
            messages: without_orphaned_results(&state.messages),
            tools: tools.to_vec(),
        }
    }
}

#[async_trait]
impl ResponseGenerator for ProviderGenerator {
    async fn generate(
        &self,
        state: &ConversationState,
        tools: &[parlor_ai::Tool],
    ) -> parlor_ai::Result<MessageEventStream> {
        let context = self.build_context(state, tools);
        stream_with_retry(self.provider.as_ref(), &self.model, &context, &self.retry).await
    }
}

const SUMMARIZER_SYSTEM: &str = "You write faithful, compact summaries of role-play \
conversations. Reply with the summary only.";

/// [`Summarizer`] backed by a chat-completions provider
pub struct ProviderSummarizer {
    provider: Arc<dyn LlmProvider>,
    model: Model,
    retry: RetryConfig,
}

impl ProviderSummarizer {
    pub fn new(provider: Arc<dyn LlmProvider>, model: Model) -> Self {
        Self {
            provider,
            model,
            retry: RetryConfig::default(),
        }
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn summary_prompt(messages: &[Message], prior: Option<&str>) -> String {
        let conversation = transcript(messages);
        match prior {
            Some(summary) => format!(
                "<conversation>\n{}</conversation>\n\n\
                 This is a summary of the conversation to date between the character and \
                 the user:\n\n{}\n\n\
                 Extend the summary by taking into account the new messages above. Keep \
                 every fact from the existing summary.",
                conversation, summary
            ),
            None => format!(
                "<conversation>\n{}</conversation>\n\n\
                 Create a summary of the conversation above between the character and the \
                 user. The summary must be a short description of the conversation so far \
                 that still captures all the relevant information shared between them.",
                conversation
            ),
        }
    }

    fn compress_prompt(text: &str) -> String {
        format!(
            "Summarize the following information in less than 50 words. Return only the \
             summary, without any other text.\n\n{}",
            text
        )
    }

    async fn complete(&self, prompt: String) -> parlor_ai::Result<String> {
        let mut context = Context::with_system(SUMMARIZER_SYSTEM);
        context.push(Message::user(prompt));
        let stream =
            stream_with_retry(self.provider.as_ref(), &self.model, &context, &self.retry).await?;
        let text = collect_text(stream).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(parlor_ai::Error::UnexpectedResponse(
                "model returned an empty summary".into(),
            ));
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl Summarizer for ProviderSummarizer {
    async fn summarize(
        &self,
        messages: &[Message],
        prior: Option<&str>,
    ) -> parlor_ai::Result<String> {
        self.complete(Self::summary_prompt(messages, prior)).await
    }

    async fn compress(&self, text: &str) -> parlor_ai::Result<String> {
        self.complete(Self::compress_prompt(text)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use parlor_ai::{Content, Provider};

    fn model() -> Model {
        Model::new(Provider::Groq, "llama-3.3-70b-versatile")
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    fn persona_state() -> ConversationState {
        let mut state = ConversationState::new("t");
        state.persona_name = "Plato".into();
        state.persona_perspective = "An idealist".into();
        state.persona_style = "Mystical".into();
        state
    }

    #[test]
    fn test_delay_for_attempt() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(retry.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn test_character_card() {
        let mut state = persona_state();
        let card = character_card(&state);
        assert!(card.contains("Name: Plato"));
        assert!(card.contains("Perspective: An idealist"));
        assert!(card.contains("Talking style: Mystical"));
        assert!(!card.contains("Summary of the conversation"));

        state.summary = "They discussed the cave.".into();
        assert!(character_card(&state).contains("They discussed the cave."));
    }

    #[test]
    fn test_orphaned_results_dropped() {
        let messages = vec![
            Message::tool_result("gone", "retrieve_context", "stale", false),
            Message::assistant("Indeed."),
            Message::user("Go on"),
        ];
        let kept = without_orphaned_results(&messages);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].text(), "Indeed.");
        assert!(without_orphaned_results(&messages[..1]).is_empty());
    }

    #[tokio::test]
    async fn test_generator_sends_card_history_and_tools() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(Message::assistant("Hi"))]));
        let generator = ProviderGenerator::new(provider.clone(), model());
        let mut state = persona_state();
        state.messages.push(Message::user("Hello"));

        let tools = vec![crate::tool::ToolId::RetrieveContext.to_api_tool()];
        let text = collect_text(generator.generate(&state, &tools).await.unwrap())
            .await
            .unwrap();
        assert_eq!(text, "Hi");

        let contexts = provider.contexts();
        assert_eq!(contexts.len(), 1);
        assert!(contexts[0].system_prompt.as_deref().unwrap().contains("Plato"));
        assert_eq!(contexts[0].messages.len(), 1);
        assert_eq!(contexts[0].tools[0].name, "retrieve_context");
    }

    #[tokio::test]
    async fn test_generator_retries_retryable_errors() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(parlor_ai::Error::RateLimited { retry_after: None }),
            Ok(Message::assistant("Finally")),
        ]));
        let generator =
            ProviderGenerator::new(provider.clone(), model()).with_retry_config(fast_retry());
        let stream = generator.generate(&persona_state(), &[]).await.unwrap();
        assert_eq!(collect_text(stream).await.unwrap(), "Finally");
        assert_eq!(provider.contexts().len(), 2);
    }

    #[tokio::test]
    async fn test_generator_does_not_retry_auth_errors() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(parlor_ai::Error::InvalidApiKey),
            Ok(Message::assistant("unreachable")),
        ]));
        let generator =
            ProviderGenerator::new(provider.clone(), model()).with_retry_config(fast_retry());
        assert!(generator.generate(&persona_state(), &[]).await.is_err());
        assert_eq!(provider.contexts().len(), 1);
    }

    #[tokio::test]
    async fn test_summarizer_prompts() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(Message::assistant("fresh")),
            Ok(Message::assistant("extended")),
            Ok(Message::assistant("compressed")),
        ]));
        let summarizer = ProviderSummarizer::new(provider.clone(), model());
        let messages = vec![Message::user("Hello"), Message::assistant("Greetings")];

        assert_eq!(summarizer.summarize(&messages, None).await.unwrap(), "fresh");
        assert_eq!(
            summarizer.summarize(&messages, Some("Old summary")).await.unwrap(),
            "extended"
        );
        assert_eq!(summarizer.compress("long text").await.unwrap(), "compressed");

        let prompts: Vec<String> = provider
            .contexts()
            .iter()
            .map(|c| c.messages[0].text())
            .collect();
        assert!(prompts[0].contains("Create a summary"));
        assert!(prompts[0].contains("[User]: Hello"));
        assert!(prompts[1].contains("Extend the summary"));
        assert!(prompts[1].contains("Old summary"));
        assert!(prompts[2].contains("less than 50 words"));
        assert!(prompts[2].contains("long text"));
    }

    #[tokio::test]
    async fn test_summarizer_empty_output_is_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(
            Message::assistant_with_content(vec![Content::text("  ")]),
        )]));
        let summarizer = ProviderSummarizer::new(provider, model());
        assert!(summarizer.compress("text").await.is_err());
    }
}
