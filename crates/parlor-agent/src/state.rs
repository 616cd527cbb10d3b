//! Conversation state: the versioned record threaded through every step of a turn.

use parlor_ai::Message;
use serde::{Deserialize, Serialize};

use crate::persona::PersonaDescriptor;

/// Game-level signals raised by tool calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameEvent {
    /// The player solved the game
    Victory,
}

impl GameEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameEvent::Victory => "victory",
        }
    }
}

impl std::fmt::Display for GameEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-thread conversation state.
///
/// The thread id is fixed at construction; everything else is mutated by the
/// orchestrator and persisted at the end of each committed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    thread_id: String,
    /// Conversation messages in insertion order
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Rolling summary of every message removed by compaction
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub persona_id: String,
    #[serde(default)]
    pub persona_name: String,
    #[serde(default)]
    pub persona_perspective: String,
    #[serde(default)]
    pub persona_style: String,
    /// Set when the current turn fired an event tool
    #[serde(default)]
    pub game_event: Option<GameEvent>,
    /// Number of committed turns
    #[serde(default)]
    pub version: u64,
}

impl ConversationState {
    /// Create an empty state for a new thread
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            summary: String::new(),
            persona_id: String::new(),
            persona_name: String::new(),
            persona_perspective: String::new(),
            persona_style: String::new(),
            game_event: None,
            version: 0,
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Copy the caller-supplied persona fields into the state
    pub fn apply_persona(&mut self, persona: &PersonaDescriptor) {
        self.persona_id = persona.id.clone();
        self.persona_name = persona.name.clone();
        self.persona_perspective = persona.perspective.clone();
        self.persona_style = persona.style.clone();
    }

    /// Record a game event; returns `false` if one was already set this turn
    pub fn raise_event(&mut self, event: GameEvent) -> bool {
        if self.game_event.is_some() {
            return false;
        }
        self.game_event = Some(event);
        true
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_empty() {
        let state = ConversationState::new("thread-1");
        assert_eq!(state.thread_id(), "thread-1");
        assert!(state.is_empty());
        assert_eq!(state.summary, "");
        assert_eq!(state.game_event, None);
        assert_eq!(state.version, 0);
    }

    #[test]
    fn test_raise_event_only_once() {
        let mut state = ConversationState::new("t");
        assert!(state.raise_event(GameEvent::Victory));
        assert!(!state.raise_event(GameEvent::Victory));
        assert_eq!(state.game_event, Some(GameEvent::Victory));
    }

    #[test]
    fn test_game_event_serializes_as_tag() {
        let mut state = ConversationState::new("t");
        state.game_event = Some(GameEvent::Victory);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["game_event"], "victory");
        assert_eq!(json["thread_id"], "t");
    }

    #[test]
    fn test_apply_persona_copies_fields() {
        let mut state = ConversationState::new("t");
        let persona = PersonaDescriptor::new("plato", "Plato", "Forms", "Poetic");
        state.apply_persona(&persona);
        assert_eq!(state.persona_id, "plato");
        assert_eq!(state.persona_name, "Plato");
        assert_eq!(state.persona_perspective, "Forms");
        assert_eq!(state.persona_style, "Poetic");
    }
}
