//! Routing decision after each generation step

use parlor_ai::Message;

use crate::tool::{ToolId, ToolSet};

/// Where the graph goes after a generation step
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Run the context retriever for this call
    Retrieve {
        call_id: String,
        arguments: serde_json::Value,
    },
    /// Run a side-effect tool branch, then generate again
    ToolBranch { tool: ToolId, call_id: String },
    /// No actionable tool call; finish the turn
    Continue,
}

impl Route {
    /// Id of the tool call this route handles, if any
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Route::Retrieve { call_id, .. } | Route::ToolBranch { call_id, .. } => Some(call_id),
            Route::Continue => None,
        }
    }
}

/// Route on every known tool
pub fn route(message: &Message) -> Route {
    route_with(message, &ToolSet::all())
}

/// Route on the tools bound for the active persona.
///
/// Tool calls are inspected in request order and the first recognized name
/// wins. Names outside `tools` count as unrecognized.
pub fn route_with(message: &Message, tools: &ToolSet) -> Route {
    for call in message.tool_calls() {
        match tools.resolve(call.name) {
            Some(ToolId::RetrieveContext) => {
                return Route::Retrieve {
                    call_id: call.id.to_string(),
                    arguments: call.arguments.clone(),
                };
            }
            Some(tool @ ToolId::TriggerVictory) => {
                return Route::ToolBranch {
                    tool,
                    call_id: call.id.to_string(),
                };
            }
            None => continue,
        }
    }
    Route::Continue
}
