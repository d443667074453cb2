//! The tool execution layer: seven tools sharing one request/response
//! contract, dispatched by name from a small registry.

mod cli_agent;
mod contract;
mod exec;
pub mod fs_utils;
mod kill;
mod message;
mod stream_command;
mod tail_output;
mod web_fetch;

pub use cli_agent::InvokeCliAgentTool;
pub use contract::{ToolErrorCode, ToolRequest, ToolResponse};
pub use exec::ExecTool;
pub use kill::KillTool;
pub use message::MessageTool;
pub use stream_command::StreamCommandTool;
pub use tail_output::TailOutputTool;
pub use web_fetch::WebFetchTool;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

/// A named capability the LLM can invoke. Tool names are part of the
/// wire contract with external LLMs and must be stable.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &str;
    /// Function schema (name/description/parameters) published to the LLM.
    fn schema(&self) -> Value;
    async fn execute(&self, req: ToolRequest) -> ToolResponse;
}

/// Name-keyed tool registry. Registration order is preserved for the
/// definitions sent to the LLM; adding a tool means extending the
/// registry and publishing its schema.
pub struct ToolRegistry {
    ordered: Vec<Arc<dyn Tool>>,
    by_name: HashMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        let mut by_name = HashMap::new();
        for tool in &tools {
            by_name.insert(tool.name(), tool.clone());
        }
        Self {
            ordered: tools,
            by_name,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.by_name.get(name)
    }

    /// Tool definitions in OpenAI function format.
    pub fn definitions(&self) -> Vec<Value> {
        self.ordered
            .iter()
            .map(|t| json!({ "type": "function", "function": t.schema() }))
            .collect()
    }

    /// Dispatch a request by name. Unknown tools yield a
    /// `PERMISSION_DENIED` response rather than an error.
    pub async fn dispatch(&self, req: ToolRequest) -> ToolResponse {
        match self.get(&req.name) {
            Some(tool) => tool.execute(req).await,
            None => ToolResponse::error(
                &req.tool_call_id,
                &format!("Unknown tool: {}", req.name),
                "Unknown tool.",
                ToolErrorCode::PermissionDenied,
                false,
            ),
        }
    }
}
