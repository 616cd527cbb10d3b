//! Streaming event types and utilities

use crate::types::{AssistantMetadata, Content, Message, StopReason, Usage};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted while a provider streams one assistant message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    /// Initial message structure
    Start { message: Message },
    /// Text content started
    TextStart { content_index: usize },
    /// Text content delta
    TextDelta { content_index: usize, delta: String },
    /// Text content completed
    TextEnd { content_index: usize, text: String },
    /// Tool call started
    ToolCallStart {
        content_index: usize,
        id: String,
        name: String,
    },
    /// Tool call arguments delta (partial JSON)
    ToolCallDelta { content_index: usize, delta: String },
    /// Tool call completed
    ToolCallEnd {
        content_index: usize,
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// Message completed successfully
    Done {
        message: Message,
        stop_reason: StopReason,
        usage: Usage,
    },
    /// Error occurred
    Error { message: String },
}

impl MessageEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageEvent::Done { .. } | MessageEvent::Error { .. })
    }

    /// Get the final message if this is a Done event
    pub fn into_message(self) -> Option<Message> {
        match self {
            MessageEvent::Done { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// A stream of message events
pub type MessageEventStream = Pin<Box<dyn Stream<Item = MessageEvent> + Send>>;

/// Builder for constructing an assistant message from streaming events
#[derive(Debug, Default)]
pub struct MessageBuilder {
    content_buffers: Vec<ContentBuffer>,
    usage: Usage,
    stop_reason: Option<StopReason>,
}

#[derive(Debug)]
enum ContentBuffer {
    Text(String),
    ToolCall {
        id: String,
        name: String,
        arguments_json: String,
    },
}

impl ContentBuffer {
    fn to_content(&self) -> Option<Content> {
        match self {
            ContentBuffer::Text(text) if text.is_empty() => None,
            ContentBuffer::Text(text) => Some(Content::text(text.clone())),
            ContentBuffer::ToolCall {
                id,
                name,
                arguments_json,
            } => {
                if id.is_empty() || name.is_empty() {
                    return None;
                }
                let arguments = serde_json::from_str(arguments_json)
                    .unwrap_or_else(|_| serde_json::json!({}));
                Some(Content::tool_call(id.clone(), name.clone(), arguments))
            }
        }
    }
}

impl MessageBuilder {
    /// Create a new message builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a streaming event and update the message state
    pub fn process_event(&mut self, event: &MessageEvent) {
        match event {
            MessageEvent::TextStart { content_index } => {
                self.ensure_buffer(*content_index, ContentBuffer::Text(String::new()));
            }
            MessageEvent::TextDelta {
                content_index,
                delta,
            } => {
                if self.content_buffers.len() <= *content_index {
                    self.ensure_buffer(*content_index, ContentBuffer::Text(String::new()));
                }
                if let Some(ContentBuffer::Text(text)) =
                    self.content_buffers.get_mut(*content_index)
                {
                    text.push_str(delta);
                }
            }
            MessageEvent::TextEnd {
                content_index,
                text,
            } => {
                self.ensure_buffer(*content_index, ContentBuffer::Text(text.clone()));
            }
            MessageEvent::ToolCallStart {
                content_index,
                id,
                name,
            } => {
                self.ensure_buffer(
                    *content_index,
                    ContentBuffer::ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments_json: String::new(),
                    },
                );
            }
            MessageEvent::ToolCallDelta {
                content_index,
                delta,
            } => {
                if let Some(ContentBuffer::ToolCall { arguments_json, .. }) =
                    self.content_buffers.get_mut(*content_index)
                {
                    arguments_json.push_str(delta);
                }
            }
            MessageEvent::ToolCallEnd {
                content_index,
                id,
                name,
                arguments,
            } => {
                self.ensure_buffer(
                    *content_index,
                    ContentBuffer::ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments_json: arguments.to_string(),
                    },
                );
            }
            MessageEvent::Done {
                stop_reason, usage, ..
            } => {
                self.stop_reason = Some(*stop_reason);
                self.usage = usage.clone();
            }
            _ => {}
        }
    }

    /// Build the final message
    pub fn build(self) -> Message {
        let content = self.current_content();
        let mut message = Message::assistant_with_content(content);
        if let Message::Assistant { metadata, .. } = &mut message {
            *metadata = AssistantMetadata {
                usage: self.usage,
                stop_reason: self.stop_reason,
                timestamp: metadata.timestamp,
                ..Default::default()
            };
        }
        message
    }

    /// Get the current partial message state
    pub fn current_content(&self) -> Vec<Content> {
        self.content_buffers
            .iter()
            .filter_map(ContentBuffer::to_content)
            .collect()
    }

    fn ensure_buffer(&mut self, index: usize, value: ContentBuffer) {
        while self.content_buffers.len() <= index {
            self.content_buffers.push(ContentBuffer::Text(String::new()));
        }
        self.content_buffers[index] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_accumulates_text_and_tool_calls() {
        let mut builder = MessageBuilder::new();
        builder.process_event(&MessageEvent::TextDelta {
            content_index: 0,
            delta: "Let me ".into(),
        });
        builder.process_event(&MessageEvent::TextDelta {
            content_index: 0,
            delta: "check.".into(),
        });
        builder.process_event(&MessageEvent::ToolCallStart {
            content_index: 1,
            id: "call_1".into(),
            name: "retrieve_context".into(),
        });
        builder.process_event(&MessageEvent::ToolCallDelta {
            content_index: 1,
            delta: "{\"query\":".into(),
        });
        builder.process_event(&MessageEvent::ToolCallDelta {
            content_index: 1,
            delta: "\"forms\"}".into(),
        });

        let msg = builder.build();
        assert_eq!(msg.text(), "Let me check.");
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "retrieve_context");
        assert_eq!(calls[0].arguments["query"], "forms");
    }

    #[test]
    fn test_builder_skips_empty_text_slot() {
        let mut builder = MessageBuilder::new();
        builder.process_event(&MessageEvent::ToolCallEnd {
            content_index: 1,
            id: "call_1".into(),
            name: "trigger_victory".into(),
            arguments: serde_json::json!({}),
        });
        let msg = builder.build();
        assert_eq!(msg.content().len(), 1);
        assert!(msg.content()[0].is_tool_call());
    }

    #[test]
    fn test_builder_malformed_arguments_become_empty_object() {
        let mut builder = MessageBuilder::new();
        builder.process_event(&MessageEvent::ToolCallStart {
            content_index: 0,
            id: "c".into(),
            name: "retrieve_context".into(),
        });
        builder.process_event(&MessageEvent::ToolCallDelta {
            content_index: 0,
            delta: "{\"query\": ".into(),
        });
        let msg = builder.build();
        assert_eq!(msg.tool_calls()[0].arguments, &serde_json::json!({}));
    }

    #[test]
    fn test_terminal_events() {
        assert!(MessageEvent::Error {
            message: "x".into()
        }
        .is_terminal());
        assert!(!MessageEvent::TextStart { content_index: 0 }.is_terminal());
    }
}
