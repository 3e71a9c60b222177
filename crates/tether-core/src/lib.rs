//! # tether-core
//!
//! Core types, traits, and primitives for the Tether execution engine.
//! This crate defines the shared vocabulary used by every other crate in
//! the workspace: the error type, conversation messages, tool contracts,
//! scheduled-task records, and the lifecycle event bus.

pub mod error;
pub mod event;
pub mod message;
pub mod task;
pub mod tool;

pub use error::{Result, TetherError};
pub use event::{BudgetWarningLevel, Event, EventBus};
pub use message::{Message, MessageContent, Role};
pub use task::{
    BudgetLimits, DailyUsage, RunStatus, ScheduleKind, ScheduledTask, TaskRun, TaskSpec,
};
pub use tool::{Tool, ToolCall, ToolHandler, ToolResult};
