//! The dispatcher.
//!
//! Wakes on a fixed tick, runs every due task serially, and enforces the
//! process-wide daily token ceiling. A single-flight lock guarantees at
//! most one tick is executing at a time; a tick that finds the lock held
//! skips instead of queueing, so a long run never builds a backlog of
//! overlapping ticks.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tether_core::{
    BudgetWarningLevel, DailyUsage, Event, EventBus, Result, RunStatus, ScheduledTask,
    TetherError, task::today_utc,
};
use tether_store::TaskStore;

use crate::heartbeat::load_heartbeat_prompt;
use crate::registry::ToolRegistry;
use crate::runner::{RunOutcome, TaskRunner};
use crate::schedule::compute_next_run;

/// Errors stored in the run log are clipped to this length.
const MAX_ERROR_LEN: usize = 500;

const WARNING_PERCENT: u8 = 80;
const CRITICAL_PERCENT: u8 = 95;

/// Process-wide daily token ceilings shared by all scheduled work.
#[derive(Debug, Clone, Copy)]
pub struct DailyLimits {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Default for DailyLimits {
    fn default() -> Self {
        Self {
            input_tokens: 2_000_000,
            output_tokens: 200_000,
        }
    }
}

/// Highest budget warning already emitted today, to keep threshold
/// crossings one-shot per day rather than once per tick.
struct WarnState {
    date: String,
    level: Option<BudgetWarningLevel>,
}

fn level_rank(level: Option<BudgetWarningLevel>) -> u8 {
    match level {
        None => 0,
        Some(BudgetWarningLevel::Warning) => 1,
        Some(BudgetWarningLevel::Critical) => 2,
    }
}

/// Runs due tasks serially under the daily ceiling.
pub struct Dispatcher {
    store: Arc<TaskStore>,
    runner: TaskRunner,
    registry: Arc<ToolRegistry>,
    events: EventBus,
    daily_limits: DailyLimits,
    heartbeat_file: Option<PathBuf>,
    // Single-flight: a tick that cannot take this immediately is skipped.
    tick_lock: tokio::sync::Mutex<()>,
    warned: Mutex<WarnState>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<TaskStore>,
        runner: TaskRunner,
        registry: Arc<ToolRegistry>,
        events: EventBus,
        daily_limits: DailyLimits,
        heartbeat_file: Option<PathBuf>,
    ) -> Self {
        Self {
            store,
            runner,
            registry,
            events,
            daily_limits,
            heartbeat_file,
            tick_lock: tokio::sync::Mutex::new(()),
            warned: Mutex::new(WarnState {
                date: today_utc(),
                level: None,
            }),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// One scheduler tick: run every due task, oldest due first, each to
    /// completion before the next starts. Returns how many tasks ran.
    ///
    /// If a previous tick is still executing this one is a no-op — the
    /// due tasks stay due and the next free tick picks them up.
    pub async fn tick(&self) -> Result<usize> {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            debug!("previous tick still running, skipping");
            return Ok(0);
        };

        let usage = self.store.daily_usage_today()?;
        self.check_budget_warnings(&usage);
        if self.over_daily_ceiling(&usage) {
            info!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "daily token ceiling reached, deferring all tasks until tomorrow"
            );
            return Ok(0);
        }

        let due = self.store.due_tasks(Utc::now())?;
        if due.is_empty() {
            return Ok(0);
        }
        debug!(count = due.len(), "due tasks");

        let mut executed = 0;
        for task in due {
            // Re-check before every run: an earlier task in this same tick
            // may have pushed today's usage over the ceiling.
            let usage = self.store.daily_usage_today()?;
            if self.over_daily_ceiling(&usage) {
                info!(task = %task.name, "daily ceiling reached mid-tick, deferring remainder");
                break;
            }
            // Engine and tool failures are folded into the run outcome; an
            // Err here is a persistence failure and aborts the tick. The
            // remaining tasks stay due and the next tick picks them up.
            self.run_one(&task).await?;
            executed += 1;
        }
        Ok(executed)
    }

    /// Run one task immediately, ignoring its schedule and the daily
    /// ceiling. Does not take the tick lock; a run triggered here can
    /// overlap a scheduled one, which the run log records faithfully.
    pub async fn run_task_now(&self, id: Uuid) -> Result<RunOutcome> {
        let task = self
            .store
            .get_task(id)?
            .ok_or_else(|| TetherError::TaskNotFound(id.to_string()))?;
        self.run_one(&task).await
    }

    async fn run_one(&self, task: &ScheduledTask) -> Result<RunOutcome> {
        let started_at = Utc::now();
        let prompt = self.resolve_prompt(task);

        let run = self.store.insert_run(task.id, started_at)?;
        self.events.publish(Event::TaskStarted {
            task_id: task.id,
            task_name: task.name.clone(),
            started_at,
        });

        let outcome = self.runner.run(task, &prompt, &self.registry).await;
        let completed_at = Utc::now();

        let status = if outcome.error.is_some() {
            RunStatus::Failed
        } else if outcome.stop_reason.is_some() {
            RunStatus::BudgetExceeded
        } else {
            RunStatus::Completed
        };

        let error = match (&outcome.error, &outcome.stop_reason) {
            (Some(e), _) => Some(clip_error(e)),
            (None, Some(reason)) => Some(format!("budget exceeded: {reason}")),
            (None, None) => None,
        };

        self.store.finalize_run(
            run.id,
            completed_at,
            status,
            outcome.budget.turns_used,
            outcome.budget.input_tokens_used,
            outcome.budget.output_tokens_used,
            &outcome.summary,
            error.as_deref(),
        )?;

        // Reschedule from this run's start time, never from the stale row.
        let mut advanced = task.clone();
        advanced.last_run_at = Some(started_at);
        let next_run_at = compute_next_run(&advanced, completed_at)?;
        self.store.mark_run(task.id, started_at, next_run_at)?;

        // Usage counts whatever was consumed, including failed runs.
        let usage = self.store.record_daily_usage(
            outcome.budget.input_tokens_used,
            outcome.budget.output_tokens_used,
        )?;
        self.check_budget_warnings(&usage);

        match status {
            RunStatus::Failed => {
                self.events.publish(Event::TaskFailed {
                    task_id: task.id,
                    task_name: task.name.clone(),
                    error: error.unwrap_or_default(),
                });
            }
            _ => {
                self.events.publish(Event::TaskCompleted {
                    task_id: task.id,
                    task_name: task.name.clone(),
                    summary: outcome.summary.clone(),
                    tokens_used: outcome.budget.input_tokens_used
                        + outcome.budget.output_tokens_used,
                    duration_secs: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
                });
            }
        }

        info!(
            task = %task.name,
            status = status.as_str(),
            next_run = %next_run_at,
            "run recorded"
        );
        Ok(outcome)
    }

    /// The heartbeat task re-reads its prompt from disk on every run.
    fn resolve_prompt(&self, task: &ScheduledTask) -> String {
        if task.is_heartbeat {
            if let Some(path) = &self.heartbeat_file {
                if let Some(prompt) = load_heartbeat_prompt(path) {
                    return prompt;
                }
            }
        }
        task.prompt.clone()
    }

    fn over_daily_ceiling(&self, usage: &DailyUsage) -> bool {
        usage.input_tokens >= self.daily_limits.input_tokens
            || usage.output_tokens >= self.daily_limits.output_tokens
    }

    fn check_budget_warnings(&self, usage: &DailyUsage) {
        let percent = percent_used(usage, &self.daily_limits);
        let level = if percent >= CRITICAL_PERCENT {
            Some(BudgetWarningLevel::Critical)
        } else if percent >= WARNING_PERCENT {
            Some(BudgetWarningLevel::Warning)
        } else {
            None
        };

        let mut warned = self.warned.lock();
        if warned.date != usage.date {
            warned.date = usage.date.clone();
            warned.level = None;
        }
        let Some(level) = level else { return };
        if level_rank(Some(level)) <= level_rank(warned.level) {
            return;
        }
        warned.level = Some(level);
        drop(warned);

        warn!(percent, ?level, "daily token budget threshold crossed");
        self.events.publish(Event::DailyBudgetWarning {
            level,
            percent,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        });
    }
}

/// Whichever of the two ceilings is closer to exhaustion, as a percentage.
fn percent_used(usage: &DailyUsage, limits: &DailyLimits) -> u8 {
    let pct = |used: u64, cap: u64| -> u64 {
        if cap == 0 { 100 } else { used * 100 / cap }
    };
    pct(usage.input_tokens, limits.input_tokens)
        .max(pct(usage.output_tokens, limits.output_tokens))
        .min(100) as u8
}

fn clip_error(error: &str) -> String {
    if error.len() <= MAX_ERROR_LEN {
        return error.to_string();
    }
    let mut end = MAX_ERROR_LEN;
    while !error.is_char_boundary(end) {
        end -= 1;
    }
    error[..end].to_string()
}
