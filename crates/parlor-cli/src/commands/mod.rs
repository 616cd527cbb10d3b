//! Slash commands for interactive mode

mod state;

pub use state::describe_state;

use parlor_agent::{PersonaDescriptor, PersonaRegistry};

/// Result of executing a slash command
#[derive(Debug)]
pub enum CommandResult {
    /// Talk to another persona on the current thread
    SwitchPersona(PersonaDescriptor),
    /// Continue on another thread
    SwitchThread(String),
    /// Show the current thread's state
    ShowState,
    /// Reset the current thread
    Reset,
    /// Reset every thread
    ResetAll,
    /// Show a message to the user (not sent to the persona)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command
pub fn execute_command(input: &str, registry: &dyn PersonaRegistry) -> Option<CommandResult> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let parts: Vec<&str> = rest.splitn(2, ' ').collect();
    let command = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "quit" | "exit" | "q" => CommandResult::Exit,

        "persona" | "p" => persona_command(args, registry),

        "thread" | "t" => {
            if args.is_empty() {
                CommandResult::Message("Usage: /thread <id>".to_string())
            } else {
                CommandResult::SwitchThread(args.to_string())
            }
        }

        "state" | "s" => CommandResult::ShowState,

        "reset" => CommandResult::Reset,

        "reset-all" => CommandResult::ResetAll,

        _ => CommandResult::Unknown(command),
    })
}

fn persona_command(args: &str, registry: &dyn PersonaRegistry) -> CommandResult {
    if args.is_empty() {
        return CommandResult::Message(list_personas(registry));
    }
    match registry.get(args) {
        Some(persona) => CommandResult::SwitchPersona(persona),
        None => CommandResult::Message(format!(
            "Unknown persona: {}\n\n{}",
            args,
            list_personas(registry)
        )),
    }
}

/// One line per registered persona
pub fn list_personas(registry: &dyn PersonaRegistry) -> String {
    let mut output = String::from("Personas:\n");
    for id in registry.ids() {
        if let Some(persona) = registry.get(&id) {
            output.push_str(&format!("  {:<14} {}\n", id, persona.name));
        }
    }
    output
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?        Show this help message
  /persona, /p [id]    List personas or switch to one
  /thread, /t <id>     Switch to another conversation thread
  /state, /s           Show the current thread's state
  /reset               Forget the current thread
  /reset-all           Forget every thread
  /quit, /exit, /q     Exit parlor

Examples:
  /persona turing      Talk to Alan Turing on this thread
  /thread game-2       Start or resume the thread "game-2""#
        .to_string()
}
