//! OpenAI-compatible Chat Completions provider (OpenAI, Groq, local servers)

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use super::LlmProvider;
use crate::{
    error::{Error, Result},
    stream::{MessageEvent, MessageEventStream},
    types::{AssistantMetadata, Content, Context, Message, Model, StopReason, Usage},
};

/// Chat-completions client for any OpenAI-compatible endpoint
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiProvider {
    /// Create a new provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    /// Create a provider for `model`, falling back to the provider's env var
    pub fn for_model(model: &Model, api_key: Option<&str>) -> Result<Self> {
        let key = match super::get_api_key(api_key, model.provider.api_key_env_var()) {
            Ok(key) => key,
            // Local OpenAI-compatible servers usually accept any key
            Err(_) if model.provider == crate::Provider::Custom => String::new(),
            Err(e) => return Err(e),
        };
        Ok(Self::new(key))
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if !self.api_key.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|_| Error::InvalidApiKey)?;
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn build_request(&self, model: &Model, context: &Context) -> OpenAiRequest {
        let mut messages = Vec::new();

        if let Some(ref system_prompt) = context.system_prompt {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: Some(system_prompt.clone()),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        messages.extend(context.messages.iter().map(convert_message));

        let tools: Option<Vec<OpenAiTool>> = if context.tools.is_empty() {
            None
        } else {
            Some(
                context
                    .tools
                    .iter()
                    .map(|t| OpenAiTool {
                        tool_type: "function".to_string(),
                        function: OpenAiFunction {
                            name: t.name.clone(),
                            description: Some(t.description.clone()),
                            parameters: Some(t.parameters.clone()),
                        },
                    })
                    .collect(),
            )
        };

        let tool_choice = tools.as_ref().map(|_| serde_json::json!("auto"));
        OpenAiRequest {
            model: model.id.clone(),
            messages,
            stream: true,
            max_tokens: Some(model.max_tokens),
            temperature: model.temperature,
            tools,
            tool_choice,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn stream(&self, model: &Model, context: &Context) -> Result<MessageEventStream> {
        let request = self.build_request(model, context);
        let url = format!("{}/chat/completions", model.base_url.trim_end_matches('/'));

        tracing::debug!(
            "Streaming {} messages to {} ({})",
            request.messages.len(),
            model.id,
            model.provider.name()
        );

        let request_builder = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&request);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source, model.clone())))
    }
}

fn convert_message(msg: &Message) -> OpenAiMessage {
    match msg {
        Message::User { .. } => OpenAiMessage {
            role: "user".to_string(),
            content: Some(msg.text()),
            tool_calls: None,
            tool_call_id: None,
        },
        Message::Assistant { content, .. } => {
            let text = msg.text();
            let tool_calls: Vec<OpenAiToolCall> = content
                .iter()
                .filter_map(|c| match c {
                    Content::ToolCall {
                        id,
                        name,
                        arguments,
                    } => Some(OpenAiToolCall {
                        id: id.clone(),
                        call_type: "function".to_string(),
                        function: OpenAiFunctionCall {
                            name: name.clone(),
                            arguments: arguments.to_string(),
                        },
                    }),
                    _ => None,
                })
                .collect();

            OpenAiMessage {
                role: "assistant".to_string(),
                content: if text.is_empty() { None } else { Some(text) },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                tool_call_id: None,
            }
        }
        Message::ToolResult { tool_call_id, .. } => OpenAiMessage {
            role: "tool".to_string(),
            content: Some(msg.text()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.clone()),
        },
    }
}

/// Partial tool call accumulated across chunks
#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
    started: bool,
}

fn create_stream(
    mut event_source: EventSource,
    model: Model,
) -> impl futures::Stream<Item = MessageEvent> {
    stream! {
        let mut accumulated_text = String::new();
        let mut text_started = false;
        let mut tool_calls: Vec<PendingToolCall> = Vec::new();
        let mut finish_reason: Option<String> = None;
        let mut usage = Usage::default();

        yield MessageEvent::Start {
            message: Message::assistant_with_content(vec![]),
        };

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    let chunk = match serde_json::from_str::<StreamChunk>(&msg.data) {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            event_source.close();
                            yield MessageEvent::Error {
                                message: format!("Failed to parse chunk: {}", e),
                            };
                            return;
                        }
                    };

                    for choice in &chunk.choices {
                        if let Some(ref content) = choice.delta.content {
                            if !content.is_empty() {
                                if !text_started {
                                    text_started = true;
                                    yield MessageEvent::TextStart { content_index: 0 };
                                }
                                accumulated_text.push_str(content);
                                yield MessageEvent::TextDelta {
                                    content_index: 0,
                                    delta: content.clone(),
                                };
                            }
                        }

                        // Slot 0 is reserved for text; tool calls follow it
                        for tc in choice.delta.tool_calls.iter().flatten() {
                            let idx = tc.index as usize;
                            while tool_calls.len() <= idx {
                                tool_calls.push(PendingToolCall::default());
                            }
                            let pending = &mut tool_calls[idx];

                            if let Some(ref id) = tc.id {
                                pending.id = id.clone();
                            }
                            if let Some(ref function) = tc.function {
                                if let Some(ref name) = function.name {
                                    pending.name = name.clone();
                                }
                                if !pending.started && !pending.name.is_empty() {
                                    pending.started = true;
                                    yield MessageEvent::ToolCallStart {
                                        content_index: idx + 1,
                                        id: pending.id.clone(),
                                        name: pending.name.clone(),
                                    };
                                }
                                if let Some(ref args) = function.arguments {
                                    pending.arguments.push_str(args);
                                    yield MessageEvent::ToolCallDelta {
                                        content_index: idx + 1,
                                        delta: args.clone(),
                                    };
                                }
                            }
                        }

                        if let Some(ref reason) = choice.finish_reason {
                            finish_reason = Some(reason.clone());
                        }
                    }

                    if let Some(ref stream_usage) = chunk.usage {
                        usage.input = stream_usage.prompt_tokens;
                        usage.output = stream_usage.completion_tokens;
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    event_source.close();
                    let body = response.text().await.unwrap_or_default();
                    yield MessageEvent::Error {
                        message: format!("HTTP {}: {}", status, body),
                    };
                    return;
                }
                Err(e) => {
                    event_source.close();
                    yield MessageEvent::Error {
                        message: format!("SSE error: {}", e),
                    };
                    return;
                }
            }
        }

        let mut content = Vec::new();
        if !accumulated_text.is_empty() {
            yield MessageEvent::TextEnd {
                content_index: 0,
                text: accumulated_text.clone(),
            };
            content.push(Content::text(accumulated_text));
        }

        for (idx, pending) in tool_calls.into_iter().enumerate() {
            if pending.id.is_empty() || pending.name.is_empty() {
                tracing::warn!("Dropping incomplete tool call at index {}", idx);
                continue;
            }
            let arguments = serde_json::from_str(&pending.arguments)
                .unwrap_or_else(|_| serde_json::json!({}));
            yield MessageEvent::ToolCallEnd {
                content_index: idx + 1,
                id: pending.id.clone(),
                name: pending.name.clone(),
                arguments: arguments.clone(),
            };
            content.push(Content::tool_call(pending.id, pending.name, arguments));
        }

        let stop_reason = match finish_reason.as_deref() {
            Some("length") => StopReason::Length,
            Some("tool_calls") => StopReason::ToolUse,
            _ => StopReason::Stop,
        };

        let mut final_message = Message::assistant_with_content(content);
        if let Message::Assistant { metadata, .. } = &mut final_message {
            *metadata = AssistantMetadata {
                provider: Some(model.provider),
                model: Some(model.id.clone()),
                usage: usage.clone(),
                stop_reason: Some(stop_reason),
                timestamp: metadata.timestamp,
            };
        }

        yield MessageEvent::Done {
            message: final_message,
            stop_reason,
            usage,
        };
    }
}

// Request types

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: u32,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
