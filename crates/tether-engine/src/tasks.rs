//! Task administration.
//!
//! Thin layer over the store that owns schedule validation and next-run
//! computation, so no task row ever carries an expression the calculator
//! cannot evaluate.

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use tether_core::{Result, ScheduleKind, ScheduledTask, TaskSpec, TetherError};
use tether_store::TaskStore;

use crate::schedule::{parse_cron, parse_interval, validate_schedule};

/// First activation for a brand-new schedule, strictly after `now`.
fn initial_next_run(
    kind: ScheduleKind,
    expr: &str,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    match kind {
        ScheduleKind::Interval => Ok(now + parse_interval(expr)?),
        ScheduleKind::Cron => parse_cron(expr)?.after(&now).next().ok_or_else(|| {
            TetherError::Schedule(format!("cron expression '{expr}' has no future activation"))
        }),
    }
}

/// Create a scheduled task. The expression is validated and the first
/// activation computed before anything is written.
pub fn create_task(store: &TaskStore, spec: &TaskSpec) -> Result<ScheduledTask> {
    validate_schedule(spec.schedule, &spec.schedule_expr)?;
    let next = initial_next_run(spec.schedule, &spec.schedule_expr, Utc::now())?;
    let task = store.create_task(spec, next)?;
    info!(
        task = %task.name,
        schedule = %task.schedule_expr,
        next_run = %next,
        "created task"
    );
    Ok(task)
}

/// Replace a task's schedule and recompute its next activation.
pub fn reschedule(
    store: &TaskStore,
    id: Uuid,
    kind: ScheduleKind,
    expr: &str,
) -> Result<ScheduledTask> {
    validate_schedule(kind, expr)?;
    let next = initial_next_run(kind, expr, Utc::now())?;
    if !store.update_schedule(id, kind, expr, next)? {
        return Err(TetherError::TaskNotFound(id.to_string()));
    }
    store
        .get_task(id)?
        .ok_or_else(|| TetherError::TaskNotFound(id.to_string()))
}

pub fn set_enabled(store: &TaskStore, id: Uuid, enabled: bool) -> Result<()> {
    if !store.set_enabled(id, enabled)? {
        return Err(TetherError::TaskNotFound(id.to_string()));
    }
    info!(%id, enabled, "toggled task");
    Ok(())
}

/// Delete a task. The heartbeat task cannot be deleted — disable it
/// instead.
pub fn delete_task(store: &TaskStore, id: Uuid) -> Result<()> {
    if let Some(task) = store.get_task(id)? {
        if task.is_heartbeat {
            return Err(TetherError::Engine(
                "the heartbeat task cannot be deleted; disable it instead".into(),
            ));
        }
    }
    if !store.delete_task(id)? {
        return Err(TetherError::TaskNotFound(id.to_string()));
    }
    info!(%id, "deleted task");
    Ok(())
}
