//! Heartbeat task bootstrap.
//!
//! The heartbeat is a distinguished scheduled task: its prompt is
//! re-read from an external file on every activation, so the operator can
//! edit standing instructions without touching the database. Exactly one
//! heartbeat task exists; it is created on startup if missing.

use std::path::Path;

use tracing::{info, warn};

use tether_core::{BudgetLimits, Result, ScheduleKind, ScheduledTask, TaskSpec};
use tether_store::TaskStore;

use crate::schedule::parse_interval;

pub const HEARTBEAT_TASK_NAME: &str = "heartbeat";

/// Fallback prompt used when the heartbeat file is absent or empty, and
/// the initial content written when the file is first created.
pub const DEFAULT_HEARTBEAT_PROMPT: &str = "\
Review the current state of my notes and reminders. If anything needs \
attention soon (due reminders, stale follow-ups, unanswered questions), \
summarize it briefly. If nothing needs attention, reply with a one-line \
all-clear.";

/// Read the heartbeat prompt from its file. Returns None when the file is
/// missing, unreadable, or effectively empty, in which case the task's
/// stored prompt is used.
pub fn load_heartbeat_prompt(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let trimmed = content.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(?path, error = %e, "failed to read heartbeat file");
            }
            None
        }
    }
}

/// Ensure the heartbeat task exists, creating it (and seeding the prompt
/// file) on first startup. Idempotent: an existing heartbeat task is
/// returned untouched, even if the configured interval has changed.
pub fn ensure_heartbeat_task(
    store: &TaskStore,
    interval: &str,
    heartbeat_file: Option<&Path>,
    limits: BudgetLimits,
) -> Result<ScheduledTask> {
    if let Some(existing) = store.heartbeat_task()? {
        return Ok(existing);
    }

    if let Some(path) = heartbeat_file {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, DEFAULT_HEARTBEAT_PROMPT)?;
            info!(?path, "seeded heartbeat prompt file");
        }
    }

    let delta = parse_interval(interval)?;
    let mut spec = TaskSpec::new(
        HEARTBEAT_TASK_NAME,
        DEFAULT_HEARTBEAT_PROMPT,
        ScheduleKind::Interval,
        interval,
    );
    spec.is_heartbeat = true;
    spec.limits = limits;

    let task = store.create_task(&spec, chrono::Utc::now() + delta)?;
    info!(interval, "created heartbeat task");
    Ok(task)
}
