use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-run resource caps. Doubles as the per-task budget template stored
/// alongside each scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLimits {
    /// Maximum engine round-trips.
    pub max_turns: u32,
    /// Maximum write-classified tool calls. Read-only tools are unlimited.
    pub max_actions: u32,
    /// Maximum input tokens across all turns.
    pub max_input_tokens: u64,
    /// Maximum output tokens across all turns.
    pub max_output_tokens: u64,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            max_turns: 10,
            max_actions: 999,
            max_input_tokens: 200_000,
            max_output_tokens: 10_000,
        }
    }
}

/// How a task's schedule expression is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    /// `<n><unit>` where unit is one of s, m, h, d — e.g. "4h", "30m".
    Interval,
    /// Standard five-field cron expression (minute hour dom month dow).
    Cron,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::Interval => "interval",
            ScheduleKind::Cron => "cron",
        }
    }
}

impl std::str::FromStr for ScheduleKind {
    type Err = crate::TetherError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "interval" => Ok(ScheduleKind::Interval),
            "cron" => Ok(ScheduleKind::Cron),
            other => Err(crate::TetherError::Schedule(format!(
                "unknown schedule kind: '{other}'"
            ))),
        }
    }
}

/// A persistent scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: Uuid,
    /// Unique human-readable name.
    pub name: String,
    /// The prompt sent to the reasoning engine when the task fires.
    /// For the heartbeat task this may be overridden per run from an
    /// external prompt file.
    pub prompt: String,
    pub schedule: ScheduleKind,
    pub schedule_expr: String,
    /// Restrict the advertised tool set to these names (None = all).
    pub tools_allowed: Option<Vec<String>>,
    pub enabled: bool,
    /// Exactly one task is the heartbeat — the periodic self-check whose
    /// prompt is re-read from disk on every run.
    pub is_heartbeat: bool,
    pub limits: BudgetLimits,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Parameters for creating a scheduled task.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: String,
    pub prompt: String,
    pub schedule: ScheduleKind,
    pub schedule_expr: String,
    pub tools_allowed: Option<Vec<String>>,
    pub enabled: bool,
    pub is_heartbeat: bool,
    pub limits: BudgetLimits,
}

impl TaskSpec {
    pub fn new(
        name: impl Into<String>,
        prompt: impl Into<String>,
        schedule: ScheduleKind,
        schedule_expr: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            schedule,
            schedule_expr: schedule_expr.into(),
            tools_allowed: None,
            enabled: true,
            is_heartbeat: false,
            limits: BudgetLimits::default(),
        }
    }
}

/// Terminal and in-flight states of a task run.
///
/// Transitions are strictly `Running → {Completed | Failed | BudgetExceeded}`;
/// a finalized run is never mutated again and there is no retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    BudgetExceeded,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::BudgetExceeded => "budget_exceeded",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = crate::TetherError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "budget_exceeded" => Ok(RunStatus::BudgetExceeded),
            other => Err(crate::TetherError::Store(format!(
                "unknown run status: '{other}'"
            ))),
        }
    }
}

/// One entry in the append-only run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: Uuid,
    pub task_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub turns_used: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub summary: String,
    pub error: Option<String>,
}

/// Aggregate token usage for one UTC calendar day, process-wide.
/// Used purely for admission control; never rolled back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyUsage {
    /// The day in `YYYY-MM-DD` form.
    pub date: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub task_runs: u32,
}

impl DailyUsage {
    pub fn empty(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            input_tokens: 0,
            output_tokens: 0,
            task_runs: 0,
        }
    }
}

/// Today's date key in UTC, `YYYY-MM-DD`.
pub fn today_utc() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}
