//! The closed set of tools a persona can call

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Tool result content returned by the victory branch
pub const VICTORY_RESULT: &str = "VICTORY_TRIGGERED";

/// Every tool the orchestrator knows how to route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolId {
    /// Look up background knowledge for the persona
    RetrieveContext,
    /// Signal that the player has won the game
    TriggerVictory,
}

impl ToolId {
    pub const ALL: [ToolId; 2] = [ToolId::RetrieveContext, ToolId::TriggerVictory];

    /// Wire name used in model tool calls
    pub fn name(&self) -> &'static str {
        match self {
            ToolId::RetrieveContext => "retrieve_context",
            ToolId::TriggerVictory => "trigger_victory",
        }
    }

    /// Resolve a wire name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolId::RetrieveContext => {
                "Search and return background information about the character you are \
                 playing, their works, ideas or historical context. Always use this tool \
                 when the user asks about them."
            }
            ToolId::TriggerVictory => {
                "Triggers the game victory sequence. Call this tool ONLY when the player \
                 correctly names the culprit. After calling it, reveal your true identity."
            }
        }
    }

    /// JSON Schema for the tool's arguments
    pub fn parameters_schema(&self) -> serde_json::Value {
        match self {
            ToolId::RetrieveContext => serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "minLength": 1,
                        "description": "What to look up"
                    }
                },
                "required": ["query"]
            }),
            ToolId::TriggerVictory => serde_json::json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    /// Convert to an API tool definition
    pub fn to_api_tool(&self) -> parlor_ai::Tool {
        parlor_ai::Tool::new(self.name(), self.description(), self.parameters_schema())
    }
}

/// The tools bound for one persona. Order is stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSet {
    tools: Vec<ToolId>,
}

impl ToolSet {
    /// Every known tool
    pub fn all() -> Self {
        Self {
            tools: ToolId::ALL.to_vec(),
        }
    }

    /// The default tool set plus the event tool for listed personas
    pub fn for_persona(persona_id: &str, event_personas: &[String]) -> Self {
        let mut tools = vec![ToolId::RetrieveContext];
        if event_personas
            .iter()
            .any(|p| p.eq_ignore_ascii_case(persona_id))
        {
            tools.push(ToolId::TriggerVictory);
        }
        Self { tools }
    }

    pub fn contains(&self, id: ToolId) -> bool {
        self.tools.contains(&id)
    }

    /// Resolve a wire name against this set
    pub fn resolve(&self, name: &str) -> Option<ToolId> {
        ToolId::from_name(name).filter(|id| self.contains(*id))
    }

    pub fn ids(&self) -> &[ToolId] {
        &self.tools
    }

    /// API definitions handed to the response generator
    pub fn api_tools(&self) -> Vec<parlor_ai::Tool> {
        self.tools.iter().map(ToolId::to_api_tool).collect()
    }
}

/// Compiled argument validators, one per tool
#[derive(Clone)]
pub struct SchemaCache {
    validators: HashMap<ToolId, Arc<jsonschema::Validator>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        let mut validators = HashMap::new();
        for id in ToolId::ALL {
            match jsonschema::validator_for(&id.parameters_schema()) {
                Ok(validator) => {
                    validators.insert(id, Arc::new(validator));
                }
                Err(e) => {
                    tracing::warn!(
                        "Invalid parameter schema for '{}', skipping validation: {}",
                        id.name(),
                        e
                    );
                }
            }
        }
        Self { validators }
    }

    /// Validate tool arguments.
    /// Returns `Some(error_message)` if validation fails, `None` if valid.
    pub fn validate(&self, id: ToolId, args: &serde_json::Value) -> Option<String> {
        let validator = self.validators.get(&id)?;
        let errors: Vec<String> = validator
            .iter_errors(args)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();

        if errors.is_empty() {
            None
        } else {
            Some(format!(
                "Tool argument validation failed:\n{}",
                errors.join("\n")
            ))
        }
    }
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}
