//! Per-run resource ledger.
//!
//! Tracks turns, write actions, and token usage against caller-supplied
//! caps. Owned exclusively by one turn-loop invocation — no locking, no
//! I/O; the final snapshot is copied into the TaskRun record.

use serde::{Deserialize, Serialize};
use tether_core::BudgetLimits;

/// Resource ledger for a single run.
///
/// Counters only ever increase. All caps are inclusive ceilings: reaching
/// a cap (not just exceeding it) trips the corresponding check.
#[derive(Debug, Clone)]
pub struct RunBudget {
    limits: BudgetLimits,
    turns_used: u32,
    actions_used: u32,
    input_tokens_used: u64,
    output_tokens_used: u64,
}

/// Final counter values, recorded alongside the run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub turns_used: u32,
    pub actions_used: u32,
    pub input_tokens_used: u64,
    pub output_tokens_used: u64,
}

impl RunBudget {
    pub fn new(limits: BudgetLimits) -> Self {
        Self {
            limits,
            turns_used: 0,
            actions_used: 0,
            input_tokens_used: 0,
            output_tokens_used: 0,
        }
    }

    /// Record one engine round-trip and its token usage.
    pub fn record_turn(&mut self, input_tokens: u64, output_tokens: u64) {
        self.turns_used += 1;
        self.input_tokens_used += input_tokens;
        self.output_tokens_used += output_tokens;
    }

    /// Record one write-classified tool call.
    pub fn record_action(&mut self) {
        self.actions_used += 1;
    }

    /// Whether another engine round-trip is allowed.
    pub fn can_continue(&self) -> bool {
        self.stop_reason().is_none()
    }

    /// Whether another write action is allowed.
    pub fn can_act(&self) -> bool {
        self.actions_used < self.limits.max_actions
    }

    /// Which cap terminated the run, if any. Checked in a fixed order —
    /// turns, then input tokens, then output tokens — so the report is
    /// deterministic when several caps are violated at once.
    pub fn stop_reason(&self) -> Option<String> {
        if self.turns_used >= self.limits.max_turns {
            return Some(format!("max turns ({})", self.limits.max_turns));
        }
        if self.input_tokens_used >= self.limits.max_input_tokens {
            return Some(format!("input token cap ({})", self.limits.max_input_tokens));
        }
        if self.output_tokens_used >= self.limits.max_output_tokens {
            return Some(format!(
                "output token cap ({})",
                self.limits.max_output_tokens
            ));
        }
        None
    }

    pub fn turns_used(&self) -> u32 {
        self.turns_used
    }

    pub fn actions_used(&self) -> u32 {
        self.actions_used
    }

    pub fn turns_remaining(&self) -> u32 {
        self.limits.max_turns.saturating_sub(self.turns_used)
    }

    pub fn actions_remaining(&self) -> u32 {
        self.limits.max_actions.saturating_sub(self.actions_used)
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            turns_used: self.turns_used,
            actions_used: self.actions_used,
            input_tokens_used: self.input_tokens_used,
            output_tokens_used: self.output_tokens_used,
        }
    }

    /// One-line usage summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "turns {}/{}, actions {}/{}, tokens {}+{}",
            self.turns_used,
            self.limits.max_turns,
            self.actions_used,
            self.limits.max_actions,
            self.input_tokens_used,
            self.output_tokens_used,
        )
    }
}
