//! Turn event types

use parlor_ai::Message;
use serde::{Deserialize, Serialize};

use crate::{error::ErrorReport, state::ConversationState, state::GameEvent};

/// Events emitted while a turn runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// The turn was accepted and the thread lock acquired
    TurnStart { thread_id: String },

    /// A generation step started (1-based)
    StepStart { step: usize },

    /// Assistant text, in the order it was produced
    TextDelta { delta: String },

    /// A generated message was appended to the state
    MessageEnd { message: Message },

    /// A tool call was answered with an error result instead of running
    ToolCallSkipped {
        tool_call_id: String,
        tool_name: String,
        reason: String,
    },

    /// The turn raised a game event
    GameEvent { event: GameEvent },

    /// History compaction started
    CompactionStart { messages_before: usize },

    /// History compaction completed
    CompactionEnd {
        messages_before: usize,
        messages_after: usize,
    },

    /// The turn committed
    TurnEnd {
        assistant_message: Message,
        state: ConversationState,
    },

    /// The turn failed; nothing was persisted
    Error { report: ErrorReport },
}

impl TurnEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnEvent::TurnEnd { .. } | TurnEvent::Error { .. })
    }
}
