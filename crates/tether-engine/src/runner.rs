//! The turn loop.
//!
//! Drives one conversation with the reasoning engine: send the history,
//! account the turn, execute requested tool calls, feed results back, and
//! repeat until the model finishes on its own or the run budget trips.

use std::sync::Arc;

use tracing::{debug, info, warn};

use tether_core::{Message, Role, ScheduledTask, ToolResult};
use tether_llm::{LlmProvider, LlmRequest};

use crate::budget::{BudgetSnapshot, RunBudget};
use crate::registry::ToolRegistry;

/// Summaries are clipped before they reach the run log.
const MAX_SUMMARY_LEN: usize = 1000;

/// Placeholder fed back for tools that return nothing. The provider API
/// rejects empty tool_result content.
const EMPTY_TOOL_OUTPUT: &str = "[no output]";

/// What one turn-loop invocation produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Final assistant text, clipped to 1000 characters.
    pub summary: String,
    /// Which budget cap ended the run, if one did.
    pub stop_reason: Option<String>,
    /// Engine or provider error that aborted the run, if one did.
    pub error: Option<String>,
    /// Final ledger counters, including any partial usage before a failure.
    pub budget: BudgetSnapshot,
}

impl RunOutcome {
    fn from_budget(budget: &RunBudget, summary: String, error: Option<String>) -> Self {
        Self {
            summary,
            stop_reason: budget.stop_reason(),
            error,
            budget: budget.snapshot(),
        }
    }
}

/// Executes a task prompt against the reasoning engine under a run budget.
pub struct TaskRunner {
    provider: Arc<dyn LlmProvider>,
    model: String,
    system_prompt: Option<String>,
    max_tokens_per_turn: u32,
    temperature: f32,
}

impl TaskRunner {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        system_prompt: Option<String>,
        max_tokens_per_turn: u32,
        temperature: f32,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            system_prompt,
            max_tokens_per_turn,
            temperature,
        }
    }

    /// Run a task's prompt to completion.
    ///
    /// Never returns Err: provider failures are folded into the outcome so
    /// the dispatcher always gets the partial accounting.
    pub async fn run(
        &self,
        task: &ScheduledTask,
        prompt: &str,
        registry: &ToolRegistry,
    ) -> RunOutcome {
        let mut budget = RunBudget::new(task.limits.clone());
        let tools = registry.llm_tools(task.tools_allowed.as_deref());
        let mut messages = vec![Message::text(Role::User, prompt)];
        let mut last_text = String::new();

        info!(
            task = %task.name,
            tools = tools.len(),
            "starting run"
        );

        while budget.can_continue() {
            let request = LlmRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
                system: self.system_prompt.clone(),
                max_tokens: self.max_tokens_per_turn,
                temperature: self.temperature,
            };

            let response = match self.provider.complete(&request).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(task = %task.name, error = %e, "provider call failed");
                    return RunOutcome::from_budget(
                        &budget,
                        clip(&last_text, MAX_SUMMARY_LEN),
                        Some(e.to_string()),
                    );
                }
            };

            // Tokens are spent the moment the response arrives, whatever it
            // contains.
            budget.record_turn(response.usage.input_tokens, response.usage.output_tokens);
            debug!(task = %task.name, usage = %budget.summary(), "turn complete");

            let text = response.message.text_content();
            if !text.is_empty() {
                last_text = text;
            }

            if response.message.tool_calls.is_empty() {
                info!(task = %task.name, usage = %budget.summary(), "run finished");
                return RunOutcome::from_budget(&budget, clip(&last_text, MAX_SUMMARY_LEN), None);
            }

            let mut results = Vec::with_capacity(response.message.tool_calls.len());
            for call in &response.message.tool_calls {
                let is_action = registry.is_action(&call.tool_name);
                let (content, is_error) = if is_action && !budget.can_act() {
                    // The call is refused, not executed — the model sees why.
                    (
                        format!(
                            "Error: action budget exhausted ({} used). No further write actions are permitted this run.",
                            budget.actions_used()
                        ),
                        true,
                    )
                } else {
                    let (output, failed) = registry.execute(&call.tool_name, &call.arguments).await;
                    if is_action {
                        budget.record_action();
                    }
                    let content = if output.is_empty() {
                        EMPTY_TOOL_OUTPUT.to_string()
                    } else {
                        output
                    };
                    (content, failed)
                };
                results.push(ToolResult {
                    tool_call_id: call.id.clone(),
                    content,
                    is_error,
                });
            }

            messages.push(response.message);
            messages.push(Message::tool_results(results));
        }

        let reason = budget.stop_reason();
        info!(
            task = %task.name,
            reason = reason.as_deref().unwrap_or("unknown"),
            usage = %budget.summary(),
            "run stopped by budget"
        );
        RunOutcome::from_budget(&budget, clip(&last_text, MAX_SUMMARY_LEN), None)
    }
}

fn clip(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
