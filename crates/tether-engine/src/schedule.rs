//! Schedule calculator.
//!
//! Pure next-activation arithmetic for interval (`4h`, `30m`) and
//! five-field cron expressions. The calculator never returns a time in
//! the past relative to `after`, and never produces a backlog of missed
//! ticks after downtime.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;

use tether_core::{Result, ScheduleKind, ScheduledTask, TetherError};

/// Parse an interval expression like "4h", "30m", "1d" into a duration.
pub fn parse_interval(expr: &str) -> Result<Duration> {
    let expr = expr.trim().to_ascii_lowercase();
    // Split on the last char, not the last byte — the unit may be any
    // (invalid) multi-byte character and must come back as Err, not a
    // slicing panic.
    let Some(unit) = expr.chars().last() else {
        return Err(invalid_interval(&expr));
    };
    let digits = &expr[..expr.len() - unit.len_utf8()];
    let value: i64 = digits.parse().map_err(|_| invalid_interval(&expr))?;
    if value <= 0 {
        return Err(invalid_interval(&expr));
    }
    match unit {
        's' => Ok(Duration::seconds(value)),
        'm' => Ok(Duration::minutes(value)),
        'h' => Ok(Duration::hours(value)),
        'd' => Ok(Duration::days(value)),
        _ => Err(invalid_interval(&expr)),
    }
}

fn invalid_interval(expr: &str) -> TetherError {
    TetherError::Schedule(format!(
        "invalid interval expression: '{expr}'. Use e.g. '4h', '30m', '1d'."
    ))
}

/// Parse a cron expression. Five-field expressions (minute hour dom month
/// dow) are normalised by prepending a seconds field.
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    let expr = expr.trim();
    let normalised = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalised)
        .map_err(|e| TetherError::Schedule(format!("invalid cron expression '{expr}': {e}")))
}

/// Validate a schedule expression for its kind. Called at task
/// creation/update time so configuration errors never reach the
/// dispatcher.
pub fn validate_schedule(kind: ScheduleKind, expr: &str) -> Result<()> {
    match kind {
        ScheduleKind::Interval => parse_interval(expr).map(|_| ()),
        ScheduleKind::Cron => parse_cron(expr).map(|_| ()),
    }
}

/// Compute the next activation time for a task, strictly after `after`.
///
/// Interval schedules tick from `last_run_at` (or `created_at` when the
/// task has never run). A base far in the past yields the first tick
/// after `after` — a single activation, never a catch-up burst.
pub fn compute_next_run(task: &ScheduledTask, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    match task.schedule {
        ScheduleKind::Interval => {
            let delta = parse_interval(&task.schedule_expr)?;
            let base = task.last_run_at.unwrap_or(task.created_at);
            if base >= after {
                return Ok(base + delta);
            }
            let elapsed = (after - base).num_seconds();
            let interval_s = delta.num_seconds();
            let ticks = elapsed / interval_s + 1;
            Ok(base + Duration::seconds(ticks * interval_s))
        }
        ScheduleKind::Cron => {
            let schedule = parse_cron(&task.schedule_expr)?;
            schedule.after(&after).next().ok_or_else(|| {
                TetherError::Schedule(format!(
                    "cron expression '{}' has no future activation",
                    task.schedule_expr
                ))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tether_core::BudgetLimits;
    use uuid::Uuid;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn task(
        kind: ScheduleKind,
        expr: &str,
        created_at: DateTime<Utc>,
        last_run_at: Option<DateTime<Utc>>,
    ) -> ScheduledTask {
        ScheduledTask {
            id: Uuid::new_v4(),
            name: "t".into(),
            prompt: "p".into(),
            schedule: kind,
            schedule_expr: expr.into(),
            tools_allowed: None,
            enabled: true,
            is_heartbeat: false,
            limits: BudgetLimits::default(),
            created_at,
            updated_at: created_at,
            last_run_at,
            next_run_at: None,
        }
    }

    // ── Interval parsing ───────────────────────────────────────

    #[test]
    fn test_parse_interval_units() {
        assert_eq!(parse_interval("30s").unwrap(), Duration::seconds(30));
        assert_eq!(parse_interval("15m").unwrap(), Duration::minutes(15));
        assert_eq!(parse_interval("4h").unwrap(), Duration::hours(4));
        assert_eq!(parse_interval("1d").unwrap(), Duration::days(1));
        assert_eq!(parse_interval(" 4H ").unwrap(), Duration::hours(4));
    }

    #[test]
    fn test_parse_interval_rejects_garbage() {
        for bad in ["", "h", "4", "4x", "-4h", "0m", "4 hours", "h4", "4µ", "µ", "4時"] {
            assert!(parse_interval(bad).is_err(), "accepted '{bad}'");
        }
    }

    #[test]
    fn test_validate_schedule() {
        assert!(validate_schedule(ScheduleKind::Interval, "4h").is_ok());
        assert!(validate_schedule(ScheduleKind::Interval, "never").is_err());
        assert!(validate_schedule(ScheduleKind::Cron, "0 9 * * 1-5").is_ok());
        assert!(validate_schedule(ScheduleKind::Cron, "not a cron").is_err());
    }

    // ── Interval next-run arithmetic ───────────────────────────

    #[test]
    fn test_never_run_task_ticks_from_creation() {
        // createdAt 2025-01-01T00:00, every 4h, asked at 01:00 → 04:00
        let t = task(ScheduleKind::Interval, "4h", at(2025, 1, 1, 0, 0), None);
        let next = compute_next_run(&t, at(2025, 1, 1, 1, 0)).unwrap();
        assert_eq!(next, at(2025, 1, 1, 4, 0));
    }

    #[test]
    fn test_next_run_after_completion() {
        // lastRunAt 04:07, every 4h, asked at 04:07 → 08:07
        let t = task(
            ScheduleKind::Interval,
            "4h",
            at(2025, 1, 1, 0, 0),
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 4, 7, 0).unwrap()),
        );
        let next = compute_next_run(&t, Utc.with_ymd_and_hms(2025, 1, 1, 4, 7, 0).unwrap())
            .unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 1, 8, 7, 0).unwrap());
    }

    #[test]
    fn test_long_downtime_yields_single_future_tick() {
        // Last ran weeks ago — next run is the first tick after `after`,
        // not a backlog of missed activations.
        let t = task(
            ScheduleKind::Interval,
            "4h",
            at(2025, 1, 1, 0, 0),
            Some(at(2025, 1, 1, 0, 0)),
        );
        let after = at(2025, 2, 15, 10, 30);
        let next = compute_next_run(&t, after).unwrap();
        assert!(next > after);
        assert!(next - after <= Duration::hours(4));
        // Still on the original tick grid
        assert_eq!((next - at(2025, 1, 1, 0, 0)).num_seconds() % (4 * 3600), 0);
    }

    #[test]
    fn test_exact_tick_boundary_is_strictly_after() {
        let t = task(
            ScheduleKind::Interval,
            "1h",
            at(2025, 1, 1, 0, 0),
            Some(at(2025, 1, 1, 0, 0)),
        );
        // `after` lands exactly on a tick — result must be the next one.
        let next = compute_next_run(&t, at(2025, 1, 1, 3, 0)).unwrap();
        assert_eq!(next, at(2025, 1, 1, 4, 0));
    }

    #[test]
    fn test_deterministic_under_replay() {
        let t = task(ScheduleKind::Interval, "30m", at(2025, 1, 1, 0, 0), None);
        let after = at(2025, 1, 3, 7, 45);
        let first = compute_next_run(&t, after).unwrap();
        for _ in 0..5 {
            assert_eq!(compute_next_run(&t, after).unwrap(), first);
        }
    }

    #[test]
    fn test_future_base_adds_one_delta() {
        let created = at(2025, 1, 2, 0, 0);
        let t = task(ScheduleKind::Interval, "1d", created, None);
        // Asked before the task was even created
        let next = compute_next_run(&t, at(2025, 1, 1, 0, 0)).unwrap();
        assert_eq!(next, at(2025, 1, 3, 0, 0));
    }

    // ── Cron ───────────────────────────────────────────────────

    #[test]
    fn test_cron_weekday_mornings() {
        // 9:00 Mon-Fri. 2025-01-03 is a Friday.
        let t = task(ScheduleKind::Cron, "0 9 * * 1-5", at(2025, 1, 1, 0, 0), None);
        let next = compute_next_run(&t, at(2025, 1, 3, 10, 0)).unwrap();
        // Friday 10:00 → Monday 2025-01-06 09:00
        assert_eq!(next, at(2025, 1, 6, 9, 0));
    }

    #[test]
    fn test_cron_strictly_after() {
        let t = task(ScheduleKind::Cron, "30 * * * *", at(2025, 1, 1, 0, 0), None);
        let next = compute_next_run(&t, at(2025, 1, 1, 5, 30)).unwrap();
        assert_eq!(next, at(2025, 1, 1, 6, 30));
    }

    #[test]
    fn test_cron_six_field_accepted() {
        let t = task(
            ScheduleKind::Cron,
            "0 */5 * * * *",
            at(2025, 1, 1, 0, 0),
            None,
        );
        let next = compute_next_run(&t, at(2025, 1, 1, 0, 2)).unwrap();
        assert_eq!(next, at(2025, 1, 1, 0, 5));
    }
}
