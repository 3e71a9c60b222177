use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Description of a tool that can be called by the reasoning engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Unique name, e.g. "search_notes", "shell_exec", "write_skill".
    pub name: String,
    /// Human-readable description for the LLM.
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: Value,
    /// Whether this tool has side-effects (write vs read). Mutating tools
    /// consume the per-run action budget; read-only tools are unlimited.
    #[serde(default)]
    pub is_mutating: bool,
}

/// A request from the LLM to call a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// The result of executing a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

/// Trait implemented by every tool exposed to the turn loop.
///
/// Implementations live outside this workspace — the engine treats them
/// uniformly and opaquely through this seam.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// The tool's descriptor (name, description, schema, classification).
    fn descriptor(&self) -> Tool;

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: &Value) -> crate::Result<String>;
}
