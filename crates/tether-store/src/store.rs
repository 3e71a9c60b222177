use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, Row, params};
use tracing::info;
use uuid::Uuid;

use tether_core::{
    BudgetLimits, DailyUsage, Result, RunStatus, ScheduleKind, ScheduledTask, TaskRun, TaskSpec,
    TetherError, task::today_utc,
};

fn db_err(e: rusqlite::Error) -> TetherError {
    TetherError::Store(e.to_string())
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TetherError::Store(format!("bad timestamp '{s}': {e}")))
}

/// Store for scheduled tasks, their run history, and daily token usage.
pub struct TaskStore {
    db: Arc<Mutex<Connection>>,
}

impl TaskStore {
    /// Open or create the task database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening task store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).map_err(db_err)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS scheduled_tasks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                prompt TEXT NOT NULL,
                schedule_kind TEXT NOT NULL,
                schedule_expr TEXT NOT NULL,
                tools_allowed TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                is_heartbeat INTEGER NOT NULL DEFAULT 0,
                max_turns INTEGER NOT NULL,
                max_actions INTEGER NOT NULL,
                max_input_tokens INTEGER NOT NULL,
                max_output_tokens INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_run_at TEXT,
                next_run_at TEXT
            );

            CREATE TABLE IF NOT EXISTS task_runs (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL REFERENCES scheduled_tasks(id),
                started_at TEXT NOT NULL,
                completed_at TEXT,
                status TEXT NOT NULL DEFAULT 'running',
                turns_used INTEGER NOT NULL DEFAULT 0,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                summary TEXT NOT NULL DEFAULT '',
                error TEXT
            );

            CREATE TABLE IF NOT EXISTS daily_usage (
                date TEXT PRIMARY KEY,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                task_runs INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_due ON scheduled_tasks(enabled, next_run_at);
            CREATE INDEX IF NOT EXISTS idx_runs_task ON task_runs(task_id, started_at);
            ",
        )
        .map_err(db_err)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    // ── Scheduled tasks ────────────────────────────────────────

    /// Insert a new task. `next_run_at` is computed by the caller (the
    /// schedule calculator lives in the engine crate).
    pub fn create_task(&self, spec: &TaskSpec, next_run_at: DateTime<Utc>) -> Result<ScheduledTask> {
        let db = self.db.lock();
        let id = Uuid::new_v4();
        let now = Utc::now();
        let tools_json = spec
            .tools_allowed
            .as_ref()
            .map(|t| serde_json::to_string(t))
            .transpose()?;
        db.execute(
            "INSERT INTO scheduled_tasks
             (id, name, prompt, schedule_kind, schedule_expr, tools_allowed, enabled, is_heartbeat,
              max_turns, max_actions, max_input_tokens, max_output_tokens,
              created_at, updated_at, last_run_at, next_run_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13, NULL, ?14)",
            params![
                id.to_string(),
                spec.name,
                spec.prompt,
                spec.schedule.as_str(),
                spec.schedule_expr,
                tools_json,
                spec.enabled,
                spec.is_heartbeat,
                spec.limits.max_turns,
                spec.limits.max_actions,
                spec.limits.max_input_tokens as i64,
                spec.limits.max_output_tokens as i64,
                now.to_rfc3339(),
                next_run_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;

        self.task_by_id_locked(&db, id)?
            .ok_or_else(|| TetherError::Store("task vanished after insert".into()))
    }

    pub fn get_task(&self, id: Uuid) -> Result<Option<ScheduledTask>> {
        let db = self.db.lock();
        self.task_by_id_locked(&db, id)
    }

    pub fn get_task_by_name(&self, name: &str) -> Result<Option<ScheduledTask>> {
        let db = self.db.lock();
        self.query_tasks_locked(&db, "WHERE name = ?1", params![name])
            .map(|mut v| v.pop())
    }

    pub fn list_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let db = self.db.lock();
        self.query_tasks_locked(&db, "ORDER BY created_at", params![])
    }

    /// Enabled tasks whose `next_run_at <= now`, earliest-due first.
    pub fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        let db = self.db.lock();
        self.query_tasks_locked(
            &db,
            "WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1
             ORDER BY next_run_at ASC",
            params![now.to_rfc3339()],
        )
    }

    pub fn heartbeat_task(&self) -> Result<Option<ScheduledTask>> {
        let db = self.db.lock();
        self.query_tasks_locked(&db, "WHERE is_heartbeat = 1", params![])
            .map(|mut v| v.pop())
    }

    pub fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<bool> {
        let db = self.db.lock();
        let rows = db
            .execute(
                "UPDATE scheduled_tasks SET enabled = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), enabled, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
        Ok(rows > 0)
    }

    /// Replace a task's schedule. The caller validates the expression and
    /// recomputes `next_run_at` first.
    pub fn update_schedule(
        &self,
        id: Uuid,
        kind: ScheduleKind,
        expr: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<bool> {
        let db = self.db.lock();
        let rows = db
            .execute(
                "UPDATE scheduled_tasks
                 SET schedule_kind = ?2, schedule_expr = ?3, next_run_at = ?4, updated_at = ?5
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    kind.as_str(),
                    expr,
                    next_run_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
        Ok(rows > 0)
    }

    pub fn delete_task(&self, id: Uuid) -> Result<bool> {
        let db = self.db.lock();
        let rows = db
            .execute(
                "DELETE FROM scheduled_tasks WHERE id = ?1",
                params![id.to_string()],
            )
            .map_err(db_err)?;
        Ok(rows > 0)
    }

    /// Advance `last_run_at`/`next_run_at` after a run. Applied regardless
    /// of the run's outcome — a failing task is rescheduled, not retried.
    pub fn mark_run(
        &self,
        id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()> {
        let db = self.db.lock();
        let rows = db
            .execute(
                "UPDATE scheduled_tasks
                 SET last_run_at = ?2, next_run_at = ?3, updated_at = ?2
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    last_run_at.to_rfc3339(),
                    next_run_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
        if rows == 0 {
            return Err(TetherError::TaskNotFound(id.to_string()));
        }
        Ok(())
    }

    // ── Run log ────────────────────────────────────────────────

    /// Open a run record in the `running` state.
    pub fn insert_run(&self, task_id: Uuid, started_at: DateTime<Utc>) -> Result<TaskRun> {
        let db = self.db.lock();
        let id = Uuid::new_v4();
        db.execute(
            "INSERT INTO task_runs (id, task_id, started_at, status)
             VALUES (?1, ?2, ?3, 'running')",
            params![id.to_string(), task_id.to_string(), started_at.to_rfc3339()],
        )
        .map_err(db_err)?;
        Ok(TaskRun {
            id,
            task_id,
            started_at,
            completed_at: None,
            status: RunStatus::Running,
            turns_used: 0,
            input_tokens: 0,
            output_tokens: 0,
            summary: String::new(),
            error: None,
        })
    }

    /// Finalize a run. Only a `running` record can be finalized — a run is
    /// never mutated after its `completed_at` is set.
    #[allow(clippy::too_many_arguments)]
    pub fn finalize_run(
        &self,
        run_id: Uuid,
        completed_at: DateTime<Utc>,
        status: RunStatus,
        turns_used: u32,
        input_tokens: u64,
        output_tokens: u64,
        summary: &str,
        error: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock();
        let rows = db
            .execute(
                "UPDATE task_runs
                 SET completed_at = ?2, status = ?3, turns_used = ?4,
                     input_tokens = ?5, output_tokens = ?6, summary = ?7, error = ?8
                 WHERE id = ?1 AND status = 'running'",
                params![
                    run_id.to_string(),
                    completed_at.to_rfc3339(),
                    status.as_str(),
                    turns_used,
                    input_tokens as i64,
                    output_tokens as i64,
                    summary,
                    error,
                ],
            )
            .map_err(db_err)?;
        if rows == 0 {
            return Err(TetherError::Store(format!(
                "run {run_id} is not in the running state"
            )));
        }
        Ok(())
    }

    /// Most recent runs, newest first, optionally for one task.
    pub fn recent_runs(&self, limit: usize, task_id: Option<Uuid>) -> Result<Vec<TaskRun>> {
        let db = self.db.lock();
        let rows = match task_id {
            Some(id) => {
                let mut stmt = db
                    .prepare(
                        "SELECT id, task_id, started_at, completed_at, status, turns_used,
                                input_tokens, output_tokens, summary, error
                         FROM task_runs WHERE task_id = ?1
                         ORDER BY started_at DESC LIMIT ?2",
                    )
                    .map_err(db_err)?;
                stmt.query_map(params![id.to_string(), limit as i64], run_from_row)
                    .map_err(db_err)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(db_err)?
            }
            None => {
                let mut stmt = db
                    .prepare(
                        "SELECT id, task_id, started_at, completed_at, status, turns_used,
                                input_tokens, output_tokens, summary, error
                         FROM task_runs ORDER BY started_at DESC LIMIT ?1",
                    )
                    .map_err(db_err)?;
                stmt.query_map(params![limit as i64], run_from_row)
                    .map_err(db_err)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(db_err)?
            }
        };
        rows.into_iter().collect()
    }

    // ── Daily usage ────────────────────────────────────────────

    /// Today's aggregate, created lazily as a zero row when absent.
    pub fn daily_usage_today(&self) -> Result<DailyUsage> {
        let db = self.db.lock();
        let date = today_utc();
        let row = db
            .query_row(
                "SELECT date, input_tokens, output_tokens, task_runs
                 FROM daily_usage WHERE date = ?1",
                params![date],
                |row| {
                    Ok(DailyUsage {
                        date: row.get(0)?,
                        input_tokens: row.get::<_, i64>(1)? as u64,
                        output_tokens: row.get::<_, i64>(2)? as u64,
                        task_runs: row.get(3)?,
                    })
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(db_err(other)),
            })?;
        Ok(row.unwrap_or_else(|| DailyUsage::empty(date)))
    }

    /// Atomic get-or-create-and-increment of today's usage row. One
    /// statement, so concurrent callers can never lose an increment.
    pub fn record_daily_usage(&self, input_tokens: u64, output_tokens: u64) -> Result<DailyUsage> {
        {
            let db = self.db.lock();
            db.execute(
                "INSERT INTO daily_usage (date, input_tokens, output_tokens, task_runs)
                 VALUES (?1, ?2, ?3, 1)
                 ON CONFLICT(date) DO UPDATE SET
                     input_tokens = input_tokens + excluded.input_tokens,
                     output_tokens = output_tokens + excluded.output_tokens,
                     task_runs = task_runs + 1",
                params![today_utc(), input_tokens as i64, output_tokens as i64],
            )
            .map_err(db_err)?;
        }
        self.daily_usage_today()
    }

    // ── Internals ──────────────────────────────────────────────

    fn task_by_id_locked(&self, db: &Connection, id: Uuid) -> Result<Option<ScheduledTask>> {
        self.query_tasks_locked(db, "WHERE id = ?1", params![id.to_string()])
            .map(|mut v| v.pop())
    }

    fn query_tasks_locked(
        &self,
        db: &Connection,
        clause: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<ScheduledTask>> {
        let sql = format!(
            "SELECT id, name, prompt, schedule_kind, schedule_expr, tools_allowed, enabled,
                    is_heartbeat, max_turns, max_actions, max_input_tokens, max_output_tokens,
                    created_at, updated_at, last_run_at, next_run_at
             FROM scheduled_tasks {clause}"
        );
        let mut stmt = db.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(args, task_from_row)
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        rows.into_iter().collect()
    }
}

type RowResult<T> = std::result::Result<Result<T>, rusqlite::Error>;

fn task_from_row(row: &Row<'_>) -> RowResult<ScheduledTask> {
    let id: String = row.get(0)?;
    let schedule_kind: String = row.get(3)?;
    let tools_allowed: Option<String> = row.get(5)?;
    let created_at: String = row.get(12)?;
    let updated_at: String = row.get(13)?;
    let last_run_at: Option<String> = row.get(14)?;
    let next_run_at: Option<String> = row.get(15)?;

    Ok((|| -> Result<ScheduledTask> {
        Ok(ScheduledTask {
            id: Uuid::parse_str(&id).map_err(|e| TetherError::Store(e.to_string()))?,
            name: row.get(1).map_err(db_err)?,
            prompt: row.get(2).map_err(db_err)?,
            schedule: ScheduleKind::from_str(&schedule_kind)?,
            schedule_expr: row.get(4).map_err(db_err)?,
            tools_allowed: tools_allowed
                .map(|json| serde_json::from_str(&json))
                .transpose()?,
            enabled: row.get(6).map_err(db_err)?,
            is_heartbeat: row.get(7).map_err(db_err)?,
            limits: BudgetLimits {
                max_turns: row.get(8).map_err(db_err)?,
                max_actions: row.get(9).map_err(db_err)?,
                max_input_tokens: row.get::<_, i64>(10).map_err(db_err)? as u64,
                max_output_tokens: row.get::<_, i64>(11).map_err(db_err)? as u64,
            },
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
            last_run_at: last_run_at.as_deref().map(parse_ts).transpose()?,
            next_run_at: next_run_at.as_deref().map(parse_ts).transpose()?,
        })
    })())
}

fn run_from_row(row: &Row<'_>) -> RowResult<TaskRun> {
    let id: String = row.get(0)?;
    let task_id: String = row.get(1)?;
    let started_at: String = row.get(2)?;
    let completed_at: Option<String> = row.get(3)?;
    let status: String = row.get(4)?;

    Ok((|| -> Result<TaskRun> {
        Ok(TaskRun {
            id: Uuid::parse_str(&id).map_err(|e| TetherError::Store(e.to_string()))?,
            task_id: Uuid::parse_str(&task_id).map_err(|e| TetherError::Store(e.to_string()))?,
            started_at: parse_ts(&started_at)?,
            completed_at: completed_at.as_deref().map(parse_ts).transpose()?,
            status: RunStatus::from_str(&status)?,
            turns_used: row.get(5).map_err(db_err)?,
            input_tokens: row.get::<_, i64>(6).map_err(db_err)? as u64,
            output_tokens: row.get::<_, i64>(7).map_err(db_err)? as u64,
            summary: row.get(8).map_err(db_err)?,
            error: row.get(9).map_err(db_err)?,
        })
    })())
}
