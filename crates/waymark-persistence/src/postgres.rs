//! Postgres-backed [`Store`].
//!
//! Every method opens exactly one transaction and commits or rolls back as a
//! unit, following the repository style of `everruns-storage` (plain
//! `sqlx::query_as::<_, Row>` rather than the `query!` compile-time macro,
//! since this crate has no `DATABASE_URL` available to check against at
//! build time) combined with the `FOR UPDATE SKIP LOCKED` row-lease pattern
//! used by `iopsystems-durable`'s task dispatch loop.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use async_trait::async_trait;
use waymark_types::{
    ErrorKind, EventType, ExecutionError, ExecutionId, ExecutionStatus, HistoryEvent, Payload, Pos, RetryPolicy,
};

use crate::error::StoreError;
use crate::models::{
    ActivityTask, ActivityTaskStatus, ExecutionRow, ExecutionSnapshot, NewActivityTask, NewExecution,
    PendingSignal, StepCommit, TaskOutcome,
};
use crate::store::Store;

/// A `Store` over a `sqlx::PgPool`. Clone is cheap: `PgPool` is a connection
/// pool handle, not a single connection.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Runs the crate's embedded migrations against the pool.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(FromRow)]
struct ExecutionDbRow {
    id: Uuid,
    workflow_name: String,
    inputs: serde_json::Value,
    status: String,
    result: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    timeout_at: Option<DateTime<Utc>>,
    parent_id: Option<Uuid>,
    parent_handle: Option<i32>,
    next_wakeup_at: Option<DateTime<Utc>>,
    pending_signals: serde_json::Value,
}

impl ExecutionDbRow {
    fn into_domain(self) -> Result<ExecutionRow, StoreError> {
        Ok(ExecutionRow {
            id: ExecutionId::from_uuid(self.id),
            workflow_name: self.workflow_name,
            inputs: Payload::from_value(self.inputs),
            status: parse_status(&self.status),
            result: self.result.map(Payload::from_value),
            error: self.error.map(serde_json::from_value).transpose()?,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            timeout_at: self.timeout_at,
            parent_id: self.parent_id.map(ExecutionId::from_uuid),
            parent_handle: self.parent_handle.map(|p| Pos(p as u32)),
            next_wakeup_at: self.next_wakeup_at,
            pending_signals: serde_json::from_value(self.pending_signals)?,
        })
    }
}

#[derive(FromRow)]
struct HistoryEventDbRow {
    pos: i32,
    event: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl HistoryEventDbRow {
    fn into_domain(self) -> Result<HistoryEvent, StoreError> {
        Ok(HistoryEvent {
            pos: Pos(self.pos as u32),
            created_at: self.created_at,
            kind: serde_json::from_value(self.event)?,
        })
    }
}

#[derive(FromRow)]
struct ActivityTaskDbRow {
    task_id: i64,
    execution_id: Uuid,
    name: String,
    args: serde_json::Value,
    status: String,
    attempt: i32,
    after_time: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    heartbeat_timeout: Option<DateTime<Utc>>,
    last_heartbeat_at: Option<DateTime<Utc>>,
    retry_policy: Option<serde_json::Value>,
    scheduled_event_pos: i32,
    locked_by: Option<String>,
    locked_until: Option<DateTime<Utc>>,
}

impl ActivityTaskDbRow {
    fn into_domain(self) -> Result<ActivityTask, StoreError> {
        Ok(ActivityTask {
            task_id: self.task_id,
            execution_id: ExecutionId::from_uuid(self.execution_id),
            name: self.name,
            args: Payload::from_value(self.args),
            status: parse_task_status(&self.status),
            attempt: self.attempt as u32,
            after_time: self.after_time,
            expires_at: self.expires_at,
            heartbeat_timeout: self.heartbeat_timeout,
            last_heartbeat_at: self.last_heartbeat_at,
            retry_policy: self.retry_policy.map(serde_json::from_value).transpose()?,
            scheduled_event_pos: Pos(self.scheduled_event_pos as u32),
            locked_by: self.locked_by,
            locked_until: self.locked_until,
        })
    }
}

fn status_label(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Pending => "PENDING",
        ExecutionStatus::Running => "RUNNING",
        ExecutionStatus::Completed => "COMPLETED",
        ExecutionStatus::Failed => "FAILED",
        ExecutionStatus::TimedOut => "TIMED_OUT",
        ExecutionStatus::Canceled => "CANCELED",
    }
}

fn parse_status(s: &str) -> ExecutionStatus {
    match s {
        "RUNNING" => ExecutionStatus::Running,
        "COMPLETED" => ExecutionStatus::Completed,
        "FAILED" => ExecutionStatus::Failed,
        "TIMED_OUT" => ExecutionStatus::TimedOut,
        "CANCELED" => ExecutionStatus::Canceled,
        _ => ExecutionStatus::Pending,
    }
}

fn task_status_label(status: ActivityTaskStatus) -> &'static str {
    match status {
        ActivityTaskStatus::Queued => "QUEUED",
        ActivityTaskStatus::Running => "RUNNING",
        ActivityTaskStatus::Completed => "COMPLETED",
        ActivityTaskStatus::Failed => "FAILED",
        ActivityTaskStatus::TimedOut => "TIMED_OUT",
        ActivityTaskStatus::Canceled => "CANCELED",
    }
}

fn parse_task_status(s: &str) -> ActivityTaskStatus {
    match s {
        "RUNNING" => ActivityTaskStatus::Running,
        "COMPLETED" => ActivityTaskStatus::Completed,
        "FAILED" => ActivityTaskStatus::Failed,
        "TIMED_OUT" => ActivityTaskStatus::TimedOut,
        "CANCELED" => ActivityTaskStatus::Canceled,
        _ => ActivityTaskStatus::Queued,
    }
}

async fn next_pos(tx: &mut Transaction<'_, Postgres>, execution_id: Uuid) -> Result<i32, StoreError> {
    let row: Option<(i32,)> =
        sqlx::query_as("SELECT pos FROM history_events WHERE execution_id = $1 ORDER BY pos DESC LIMIT 1")
            .bind(execution_id)
            .fetch_optional(&mut **tx)
            .await?;
    Ok(row.map(|(p,)| p + 1).unwrap_or(0))
}

async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    execution_id: Uuid,
    pos: i32,
    kind: &EventType,
) -> Result<(), StoreError> {
    sqlx::query("INSERT INTO history_events (execution_id, pos, kind, event) VALUES ($1, $2, $3, $4)")
        .bind(execution_id)
        .bind(pos)
        .bind(kind.name())
        .bind(serde_json::to_value(kind)?)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn insert_task(
    tx: &mut Transaction<'_, Postgres>,
    task: &NewActivityTask,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO activity_tasks
            (execution_id, name, args, after_time, expires_at, heartbeat_timeout, retry_policy, scheduled_event_pos)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(task.execution_id.as_uuid())
    .bind(&task.name)
    .bind(task.args.as_value())
    .bind(task.after_time)
    .bind(task.expires_at)
    .bind(task.heartbeat_timeout)
    .bind(task.retry_policy.map(|p| serde_json::to_value(p)).transpose()?)
    .bind(task.scheduled_event_pos.0 as i32)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn create_execution(&self, input: NewExecution) -> Result<ExecutionId, StoreError> {
        let now = Utc::now();
        let id = ExecutionId::new();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO executions
                (id, workflow_name, inputs, status, created_at, started_at, timeout_at, parent_id, parent_handle, next_wakeup_at)
            VALUES ($1, $2, $3, $4, $5, $5, $6, $7, $8, $5)
            "#,
        )
        .bind(id.as_uuid())
        .bind(&input.workflow_name)
        .bind(input.inputs.as_value())
        .bind(status_label(ExecutionStatus::Pending))
        .bind(now)
        .bind(input.timeout_at)
        .bind(input.parent_id.map(|p| p.as_uuid()))
        .bind(input.parent_handle.map(|p| p.0 as i32))
        .execute(&mut *tx)
        .await?;

        insert_event(
            &mut tx,
            id.as_uuid(),
            0,
            &EventType::WorkflowStarted { inputs: input.inputs },
        )
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn snapshot(&self, id: ExecutionId) -> Result<Option<ExecutionSnapshot>, StoreError> {
        let row: Option<ExecutionDbRow> = sqlx::query_as("SELECT * FROM executions WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };

        let history_rows: Vec<HistoryEventDbRow> =
            sqlx::query_as("SELECT pos, event, created_at FROM history_events WHERE execution_id = $1 ORDER BY pos ASC")
                .bind(id.as_uuid())
                .fetch_all(&self.pool)
                .await?;

        let history = history_rows
            .into_iter()
            .map(|r| r.into_domain())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(ExecutionSnapshot {
            execution: row.into_domain()?,
            history,
        }))
    }

    async fn fetch_runnable(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ExecutionId>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            WITH due AS (
                SELECT id FROM executions
                WHERE status NOT IN ('COMPLETED', 'FAILED', 'TIMED_OUT', 'CANCELED')
                  AND next_wakeup_at IS NOT NULL
                  AND next_wakeup_at <= $1
                ORDER BY next_wakeup_at
                FOR UPDATE SKIP LOCKED
                LIMIT $2
            )
            UPDATE executions SET next_wakeup_at = NULL
            FROM due WHERE executions.id = due.id
            RETURNING executions.id
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(rows.into_iter().map(|(id,)| ExecutionId::from_uuid(id)).collect())
    }

    async fn fetch_timed_out(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ExecutionId>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            WITH due AS (
                SELECT id FROM executions
                WHERE status NOT IN ('COMPLETED', 'FAILED', 'TIMED_OUT', 'CANCELED')
                  AND timeout_at IS NOT NULL
                  AND timeout_at <= $1
                ORDER BY timeout_at
                FOR UPDATE SKIP LOCKED
                LIMIT $2
            )
            UPDATE executions SET next_wakeup_at = NULL
            FROM due WHERE executions.id = due.id
            RETURNING executions.id
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(rows.into_iter().map(|(id,)| ExecutionId::from_uuid(id)).collect())
    }

    async fn lease_due_tasks(
        &self,
        now: DateTime<Utc>,
        worker_id: &str,
        limit: i64,
    ) -> Result<Vec<ActivityTask>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<ActivityTaskDbRow> = sqlx::query_as(
            r#"
            WITH due AS (
                SELECT task_id FROM activity_tasks
                WHERE status = 'QUEUED' AND after_time <= $1
                ORDER BY after_time
                FOR UPDATE SKIP LOCKED
                LIMIT $3
            )
            UPDATE activity_tasks SET status = 'RUNNING', locked_by = $2
            FROM due WHERE activity_tasks.task_id = due.task_id
            RETURNING activity_tasks.*
            "#,
        )
        .bind(now)
        .bind(worker_id)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    async fn fetch_expired_tasks(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ActivityTask>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<ActivityTaskDbRow> = sqlx::query_as(
            r#"
            WITH due AS (
                SELECT task_id FROM activity_tasks
                WHERE status = 'RUNNING'
                  AND (
                    (expires_at IS NOT NULL AND expires_at <= $1)
                    OR (heartbeat_timeout IS NOT NULL AND heartbeat_timeout <= $1)
                  )
                ORDER BY task_id
                FOR UPDATE SKIP LOCKED
                LIMIT $2
            )
            UPDATE activity_tasks SET status = 'TIMED_OUT'
            FROM due WHERE activity_tasks.task_id = due.task_id
            RETURNING activity_tasks.*
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    async fn complete_task(&self, task_id: i64, outcome: TaskOutcome) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row: Option<(Uuid, i32, String)> =
            sqlx::query_as("SELECT execution_id, scheduled_event_pos, name FROM activity_tasks WHERE task_id = $1")
                .bind(task_id)
                .fetch_optional(&mut *tx)
                .await?;
        let (execution_id, scheduled_event_pos, task_name) = row.ok_or(StoreError::TaskNotFound(task_id))?;
        let scheduled_pos = Pos(scheduled_event_pos as u32);
        let is_timer = task_name == waymark_types::SLEEP_ACTIVITY_NAME;

        match outcome {
            TaskOutcome::RetryScheduled { retry_after, .. } => {
                sqlx::query(
                    "UPDATE activity_tasks SET status = 'QUEUED', attempt = attempt + 1, after_time = $2 WHERE task_id = $1",
                )
                .bind(task_id)
                .bind(retry_after)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                return Ok(());
            }
            TaskOutcome::Completed(result) => {
                sqlx::query("UPDATE activity_tasks SET status = 'COMPLETED' WHERE task_id = $1")
                    .bind(task_id)
                    .execute(&mut *tx)
                    .await?;
                let pos = next_pos(&mut tx, execution_id).await?;
                let kind = if is_timer {
                    EventType::TimerFired { scheduled_pos }
                } else {
                    EventType::ActivityCompleted { scheduled_pos, result }
                };
                insert_event(&mut tx, execution_id, pos, &kind).await?;
            }
            TaskOutcome::Failed(error) => {
                sqlx::query("UPDATE activity_tasks SET status = 'FAILED' WHERE task_id = $1")
                    .bind(task_id)
                    .execute(&mut *tx)
                    .await?;
                let pos = next_pos(&mut tx, execution_id).await?;
                insert_event(&mut tx, execution_id, pos, &EventType::ActivityFailed { scheduled_pos, error }).await?;
            }
            TaskOutcome::TimedOut(error) => {
                sqlx::query("UPDATE activity_tasks SET status = 'TIMED_OUT' WHERE task_id = $1")
                    .bind(task_id)
                    .execute(&mut *tx)
                    .await?;
                let pos = next_pos(&mut tx, execution_id).await?;
                insert_event(&mut tx, execution_id, pos, &EventType::ActivityTimedOut { scheduled_pos, error }).await?;
            }
        }

        sqlx::query("UPDATE executions SET next_wakeup_at = $2 WHERE id = $1")
            .bind(execution_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn step_commit(&self, commit: StepCommit) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let execution_uuid = commit.execution_id.as_uuid();

        let mut pos = next_pos(&mut tx, execution_uuid).await?;
        for kind in &commit.new_events {
            insert_event(&mut tx, execution_uuid, pos, kind).await?;
            pos += 1;
        }

        for task in &commit.new_tasks {
            insert_task(&mut tx, task).await?;
        }

        if !commit.consumed_signals.is_empty() {
            let (pending,): (serde_json::Value,) =
                sqlx::query_as("SELECT pending_signals FROM executions WHERE id = $1")
                    .bind(execution_uuid)
                    .fetch_one(&mut *tx)
                    .await?;
            let mut pending: Vec<PendingSignal> = serde_json::from_value(pending)?;
            for name in &commit.consumed_signals {
                if let Some(idx) = pending.iter().position(|p| &p.name == name) {
                    pending.remove(idx);
                }
            }
            sqlx::query("UPDATE executions SET pending_signals = $2 WHERE id = $1")
                .bind(execution_uuid)
                .bind(serde_json::to_value(&pending)?)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(status) = commit.status {
            let finished_at = if status.is_terminal() { Some(now) } else { None };
            sqlx::query(
                r#"
                UPDATE executions
                SET status = $2, result = COALESCE($3, result), error = COALESCE($4, error),
                    finished_at = COALESCE($5, finished_at),
                    next_wakeup_at = CASE WHEN $6 THEN NULL ELSE next_wakeup_at END
                WHERE id = $1
                "#,
            )
            .bind(execution_uuid)
            .bind(status_label(status))
            .bind(commit.result.as_ref().map(|p| p.as_value()))
            .bind(commit.error.as_ref().map(|e| serde_json::to_value(e)).transpose()?)
            .bind(finished_at)
            .bind(status.is_terminal())
            .execute(&mut *tx)
            .await?;
        }

        if let Some(wakeup) = commit.next_wakeup_at {
            sqlx::query("UPDATE executions SET next_wakeup_at = $2 WHERE id = $1")
                .bind(execution_uuid)
                .bind(wakeup)
                .execute(&mut *tx)
                .await?;
        }

        if commit.status.is_some_and(|s| s.is_terminal()) {
            propagate_child_result(&mut tx, execution_uuid, now).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn signal_execution(&self, id: ExecutionId, name: String, payload: Payload) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let execution_uuid = id.as_uuid();

        let terminal: Option<(String,)> = sqlx::query_as("SELECT status FROM executions WHERE id = $1")
            .bind(execution_uuid)
            .fetch_optional(&mut *tx)
            .await?;
        let Some((status,)) = terminal else {
            return Err(StoreError::NotFound(id));
        };
        if parse_status(&status).is_terminal() {
            return Ok(());
        }

        let history_rows: Vec<HistoryEventDbRow> =
            sqlx::query_as("SELECT pos, event, created_at FROM history_events WHERE execution_id = $1 ORDER BY pos ASC")
                .bind(execution_uuid)
                .fetch_all(&mut *tx)
                .await?;
        let history = history_rows
            .into_iter()
            .map(|r| r.into_domain())
            .collect::<Result<Vec<_>, _>>()?;
        let wait_pos = waymark_journal::resolution::pending_signal_wait(&history, &name);

        match wait_pos {
            Some(wait_pos) => {
                let pos = next_pos(&mut tx, execution_uuid).await?;
                insert_event(
                    &mut tx,
                    execution_uuid,
                    pos,
                    &EventType::SignalReceived { wait_pos, name, payload },
                )
                .await?;
                sqlx::query("UPDATE executions SET next_wakeup_at = $2 WHERE id = $1")
                    .bind(execution_uuid)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                let entry = serde_json::to_value(PendingSignal {
                    name,
                    payload,
                    received_at: now,
                })?;
                sqlx::query("UPDATE executions SET pending_signals = pending_signals || $2::jsonb WHERE id = $1")
                    .bind(execution_uuid)
                    .bind(entry)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn cancel_execution(&self, id: ExecutionId, reason: String) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let execution_uuid = id.as_uuid();

        let terminal: Option<(String,)> = sqlx::query_as("SELECT status FROM executions WHERE id = $1")
            .bind(execution_uuid)
            .fetch_optional(&mut *tx)
            .await?;
        let Some((status,)) = terminal else {
            return Err(StoreError::NotFound(id));
        };
        if parse_status(&status).is_terminal() {
            return Ok(());
        }

        let pos = next_pos(&mut tx, execution_uuid).await?;
        insert_event(&mut tx, execution_uuid, pos, &EventType::WorkflowCanceled { reason }).await?;

        sqlx::query(
            "UPDATE executions SET status = $2, finished_at = $3, next_wakeup_at = NULL WHERE id = $1",
        )
        .bind(execution_uuid)
        .bind(status_label(ExecutionStatus::Canceled))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn cancel_queued_tasks(&self, id: ExecutionId) -> Result<(), StoreError> {
        sqlx::query("UPDATE activity_tasks SET status = 'CANCELED' WHERE execution_id = $1 AND status = 'QUEUED'")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_children(&self, id: ExecutionId) -> Result<Vec<ExecutionId>, StoreError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM executions WHERE parent_id = $1")
            .bind(id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(child_id,)| ExecutionId::from_uuid(child_id)).collect())
    }
}

/// If `execution_id` has a `parent_id`/`parent_handle`, append
/// `ChildCompleted`/`ChildFailed` to the parent and wake it. Runs inside the
/// same transaction as the child's own terminal-status commit.
async fn propagate_child_result(
    tx: &mut Transaction<'_, Postgres>,
    execution_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let row: Option<(Option<Uuid>, Option<i32>, String, Option<serde_json::Value>, Option<serde_json::Value>)> =
        sqlx::query_as("SELECT parent_id, parent_handle, status, result, error FROM executions WHERE id = $1")
            .bind(execution_id)
            .fetch_optional(&mut **tx)
            .await?;
    let Some((Some(parent_id), Some(parent_handle), status, result, error)) = row else {
        return Ok(());
    };

    let scheduled_pos = Pos(parent_handle as u32);
    let kind = if status == status_label(ExecutionStatus::Completed) {
        EventType::ChildCompleted {
            scheduled_pos,
            result: result.map(Payload::from_value).unwrap_or_default(),
        }
    } else {
        let error: ExecutionError = match error {
            Some(v) => serde_json::from_value(v)?,
            None => ExecutionError::new(ErrorKind::Internal, "child failed with no error detail"),
        };
        EventType::ChildFailed { scheduled_pos, error }
    };

    let pos = next_pos(tx, parent_id).await?;
    insert_event(tx, parent_id, pos, &kind).await?;
    sqlx::query("UPDATE executions SET next_wakeup_at = $2 WHERE id = $1")
        .bind(parent_id)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
