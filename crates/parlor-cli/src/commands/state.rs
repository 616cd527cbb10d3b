//! /state command - show the current thread

use parlor_agent::ConversationState;

/// Render a thread's committed state for the terminal
pub fn describe_state(thread_id: &str, state: Option<&ConversationState>) -> String {
    let Some(state) = state else {
        return format!("Thread {} has no saved state yet.", thread_id);
    };

    let mut output = String::from("Thread Info\n");
    output.push_str(&"-".repeat(40));
    output.push('\n');

    output.push_str(&format!("Thread:     {}\n", state.thread_id()));
    output.push_str(&format!(
        "Persona:    {} ({})\n",
        state.persona_name, state.persona_id
    ));
    output.push_str(&format!("Turns:      {}\n", state.version));
    output.push('\n');

    let count = |role: &str| state.messages.iter().filter(|m| m.role() == role).count();
    output.push_str(&format!("Messages:   {} total\n", state.messages.len()));
    output.push_str(&format!(
        "            {} user, {} assistant, {} tool results\n",
        count("user"),
        count("assistant"),
        count("tool")
    ));

    if let Some(event) = state.game_event {
        output.push_str(&format!("Event:      {}\n", event));
    }

    if !state.summary.is_empty() {
        output.push_str("\nSummary:\n");
        output.push_str(&state.summary);
        output.push('\n');
    }

    output
}
