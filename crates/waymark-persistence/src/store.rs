use async_trait::async_trait;
use chrono::{DateTime, Utc};
use waymark_types::{ExecutionId, Payload};

use crate::error::StoreError;
use crate::models::{ActivityTask, ExecutionSnapshot, NewExecution, StepCommit, TaskOutcome};

/// The engine's only view of durable state.
///
/// Every method is documented as a single atomic unit of work: the
/// implementation is free to use whatever transaction boundary it needs, but
/// callers may assume each call either fully applies or has no effect.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create a new execution row plus its `WORKFLOW_STARTED` event, runnable
    /// immediately (`next_wakeup_at = now`).
    async fn create_execution(&self, input: NewExecution) -> Result<ExecutionId, StoreError>;

    /// Load an execution's row and full journal for a fresh replay.
    async fn snapshot(&self, id: ExecutionId) -> Result<Option<ExecutionSnapshot>, StoreError>;

    /// Non-terminal executions with `next_wakeup_at <= now`, leased for this
    /// tick under `FOR UPDATE SKIP LOCKED` so concurrent workers never step
    /// the same execution twice.
    async fn fetch_runnable(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ExecutionId>, StoreError>;

    /// Non-terminal executions whose `timeout_at` has elapsed, leased the
    /// same way as `fetch_runnable` (clearing `next_wakeup_at`) so the
    /// worker's timeout sweep and its normal step loop never race over the
    /// same row.
    async fn fetch_timed_out(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ExecutionId>, StoreError>;

    /// Lease up to `limit` `QUEUED`/retry-due `activity_tasks` rows for
    /// `worker_id`, marking them `RUNNING`.
    async fn lease_due_tasks(
        &self,
        now: DateTime<Utc>,
        worker_id: &str,
        limit: i64,
    ) -> Result<Vec<ActivityTask>, StoreError>;

    /// `RUNNING` `activity_tasks` whose `expires_at` or `heartbeat_timeout`
    /// elapsed, leased the same way as `lease_due_tasks` (flipping status away
    /// from `RUNNING` under the same lock) so a worker whose in-process
    /// dispatch already raced this deadline and one sweeping after a crash or
    /// restart never both finalize the same row.
    async fn fetch_expired_tasks(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ActivityTask>, StoreError>;

    /// Record the outcome of a leased task. On `Completed`/`Failed`/`TimedOut`
    /// this also appends the matching terminal `HistoryEvent` and marks the
    /// owning execution runnable; on `RetryScheduled` only the task row
    /// changes (no history event — intermediate retries are never written to
    /// the journal, only the final attempt is).
    async fn complete_task(&self, task_id: i64, outcome: TaskOutcome) -> Result<(), StoreError>;

    /// Atomically commit one scheduler step's new events, new tasks, and
    /// optional terminal status, draining any `consumed_signals` from the
    /// execution's pending-signal buffer as part of the same transaction.
    async fn step_commit(&self, commit: StepCommit) -> Result<(), StoreError>;

    /// Deliver a signal. If a `SignalWait` for `name` is already the newest
    /// unresolved wait on this execution's journal, appends `SignalReceived`
    /// directly; otherwise buffers it in `pending_signals` for the next step
    /// that registers a matching wait. No-op if the execution is terminal.
    async fn signal_execution(&self, id: ExecutionId, name: String, payload: Payload) -> Result<(), StoreError>;

    /// Append `WorkflowCanceled` and mark the execution `CANCELED`. No-op if
    /// already terminal.
    async fn cancel_execution(&self, id: ExecutionId, reason: String) -> Result<(), StoreError>;

    /// Mark every `QUEUED` `activity_tasks` row belonging to `id` as
    /// `CANCELED`, without touching anything already `RUNNING` — running
    /// activities are not preempted (§5).
    async fn cancel_queued_tasks(&self, id: ExecutionId) -> Result<(), StoreError>;

    /// Direct (non-recursive) children of `id`, for cascading cancellation
    /// and timeout propagation.
    async fn list_children(&self, id: ExecutionId) -> Result<Vec<ExecutionId>, StoreError>;
}
