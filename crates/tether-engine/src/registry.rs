//! Tool registry with error isolation.
//!
//! Holds the tool handlers available to one run and executes them by
//! name. Handler failures and unknown names are converted to descriptive
//! result strings so the turn loop can report them to the reasoning
//! engine instead of crashing the run.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error};

use tether_core::{Tool, ToolHandler};

/// Registry of the tools advertised to the reasoning engine.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Last registration for a name wins — registries are
    /// built fresh per dispatcher, so an overwrite is unexpected but must
    /// not fail.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.descriptor().name;
        if self.tools.insert(name.clone(), handler).is_some() {
            debug!(tool = %name, "overwrote existing tool registration");
        }
    }

    /// Execute a tool by name. Never returns an error: unknown names and
    /// handler failures become result strings the engine can react to.
    /// The flag reports failure explicitly, so tool output is never
    /// re-parsed to guess whether the call succeeded.
    pub async fn execute(&self, name: &str, args: &Value) -> (String, bool) {
        let Some(handler) = self.tools.get(name) else {
            return (format!("Error: unknown tool '{name}'"), true);
        };
        match handler.execute(args).await {
            Ok(output) => (output, false),
            Err(e) => {
                error!(tool = %name, error = %e, "tool execution failed");
                (format!("Error executing {name}: {e}"), true)
            }
        }
    }

    /// Whether the named tool is classified as a write action. Unknown
    /// names are not actions — they fail at execution instead.
    pub fn is_action(&self, name: &str) -> bool {
        self.tools
            .get(name)
            .map(|h| h.descriptor().is_mutating)
            .unwrap_or(false)
    }

    /// Project descriptors into the provider tool list, optionally
    /// restricted to an allow-list of names.
    pub fn llm_tools(&self, allowed: Option<&[String]>) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self
            .tools
            .values()
            .map(|h| h.descriptor())
            .filter(|t| match allowed {
                Some(names) => names.iter().any(|n| n == &t.name),
                None => true,
            })
            .collect();
        // Stable order for deterministic requests
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}
