//! History compaction for long conversations
//!
//! Once a thread holds `trigger_messages` messages, everything except the most
//! recent `keep_messages` is folded into the rolling summary and removed.

use parlor_ai::{Content, Message};

use crate::{
    capability::Summarizer,
    error::{Error, Result},
    state::ConversationState,
};

/// Configuration for history compaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionConfig {
    /// Whether compaction is enabled
    pub enabled: bool,
    /// Compact when the thread holds at least this many messages
    pub trigger_messages: usize,
    /// Messages kept verbatim after compaction
    pub keep_messages: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_messages: 30,
            keep_messages: 5,
        }
    }
}

impl CompactionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.keep_messages == 0 {
            return Err(Error::Config("keep_messages must be at least 1".into()));
        }
        if self.keep_messages >= self.trigger_messages {
            return Err(Error::Config(format!(
                "keep_messages ({}) must be smaller than trigger_messages ({})",
                self.keep_messages, self.trigger_messages
            )));
        }
        Ok(())
    }

    /// Whether a thread with `len` messages should be compacted
    pub fn should_compact(&self, len: usize) -> bool {
        self.enabled && len >= self.trigger_messages && len > self.keep_messages
    }
}

/// Result of a compaction: the replacement summary and surviving messages
#[derive(Debug, Clone)]
pub struct Compacted {
    pub summary: String,
    pub messages: Vec<Message>,
}

/// Ids of the messages a compaction would delete (the oldest prefix).
/// Empty when the policy does not trigger.
pub fn ids_to_remove(messages: &[Message], config: &CompactionConfig) -> Vec<String> {
    if !config.should_compact(messages.len()) {
        return Vec::new();
    }
    let cut = messages.len() - config.keep_messages;
    messages[..cut].iter().map(|m| m.id().to_string()).collect()
}

/// Remove messages by id, returning the survivors in order
pub fn remove_by_id(messages: &[Message], ids: &[String]) -> Vec<Message> {
    messages
        .iter()
        .filter(|m| !ids.iter().any(|id| id == m.id()))
        .cloned()
        .collect()
}

/// Summarize and prune a snapshot of the state.
///
/// Returns `Ok(None)` when the policy does not trigger. The state itself is
/// not touched; callers commit the result.
pub async fn compact(
    state: &ConversationState,
    config: &CompactionConfig,
    summarizer: &dyn Summarizer,
) -> Result<Option<Compacted>> {
    let ids = ids_to_remove(&state.messages, config);
    if ids.is_empty() {
        return Ok(None);
    }

    let prior = (!state.summary.is_empty()).then_some(state.summary.as_str());
    let summary = summarizer
        .summarize(&state.messages, prior)
        .await
        .map_err(|e| Error::Summarization(e.to_string()))?;

    let summary = summary.trim().to_string();
    if summary.is_empty() {
        return Err(Error::Summarization("summarizer returned no text".into()));
    }

    let messages = remove_by_id(&state.messages, &ids);
    tracing::info!(
        "Compacted thread {}: {} -> {} messages",
        state.thread_id(),
        state.messages.len(),
        messages.len()
    );

    Ok(Some(Compacted {
        summary,
        messages,
    }))
}

// --- Message Serialization ---

/// Render messages as a plain transcript for summarization prompts.
/// Uses a labelled format so the model does not try to continue the conversation.
pub fn transcript(messages: &[Message]) -> String {
    let mut out = String::new();

    for msg in messages {
        match msg {
            Message::User { .. } => {
                let text = msg.text();
                if !text.is_empty() {
                    out.push_str("[User]: ");
                    out.push_str(&text);
                    out.push('\n');
                }
            }
            Message::Assistant { content, .. } => {
                let text = msg.text();
                if !text.is_empty() {
                    out.push_str("[Assistant]: ");
                    out.push_str(&text);
                    out.push('\n');
                }
                let calls: Vec<String> = content
                    .iter()
                    .filter_map(|c| match c {
                        Content::ToolCall {
                            name, arguments, ..
                        } => Some(format!("{}({})", name, format_tool_args(arguments))),
                        _ => None,
                    })
                    .collect();
                if !calls.is_empty() {
                    out.push_str("[Assistant tool calls]: ");
                    out.push_str(&calls.join("; "));
                    out.push('\n');
                }
            }
            Message::ToolResult {
                tool_name,
                is_error,
                ..
            } => {
                let text = msg.text();
                if *is_error {
                    out.push_str(&format!("[Tool error ({})]: ", tool_name));
                } else {
                    out.push_str(&format!("[Tool result ({})]: ", tool_name));
                }
                out.push_str(&truncate(&text, 2000));
                out.push('\n');
            }
        }
    }

    out
}

fn format_tool_args(args: &serde_json::Value) -> String {
    match args {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => format!("{}=\"{}\"", k, truncate(s, 100)),
                other => format!("{}={}", k, truncate(&other.to_string(), 100)),
            })
            .collect::<Vec<_>>()
            .join(", "),
        _ => args.to_string(),
    }
}

/// Truncate on a char boundary
fn truncate(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &s[..end])
}
