//! # tether-engine
//!
//! The budget-bounded, tool-calling execution engine: a resource ledger
//! that caps turns, write actions, and token counts; a tool registry with
//! error isolation; the turn loop that drives a conversation with the
//! reasoning engine; the schedule calculator for interval and cron
//! expressions; and the dispatcher that runs due tasks serially under a
//! single-flight lock and a shared daily token ceiling.

pub mod budget;
pub mod dispatcher;
pub mod heartbeat;
pub mod registry;
pub mod runner;
pub mod schedule;
pub mod tasks;

pub use budget::{BudgetSnapshot, RunBudget};
pub use dispatcher::{DailyLimits, Dispatcher};
pub use heartbeat::{
    DEFAULT_HEARTBEAT_PROMPT, HEARTBEAT_TASK_NAME, ensure_heartbeat_task, load_heartbeat_prompt,
};
pub use registry::ToolRegistry;
pub use runner::{RunOutcome, TaskRunner};
pub use schedule::{compute_next_run, parse_interval, validate_schedule};
