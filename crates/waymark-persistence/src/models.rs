use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use waymark_types::{ExecutionError, ExecutionId, ExecutionStatus, HistoryEvent, Payload, Pos, RetryPolicy};

/// Input to [`crate::Store::create_execution`].
#[derive(Clone, Debug)]
pub struct NewExecution {
    pub workflow_name: String,
    pub inputs: Payload,
    pub timeout_at: Option<DateTime<Utc>>,
    pub parent_id: Option<ExecutionId>,
    pub parent_handle: Option<Pos>,
}

/// A signal delivered before any matching `SignalWait` was recorded.
///
/// Buffered on the execution row rather than the journal: writing a bare
/// `SIGNAL_RECEIVED` with no `wait_pos` to link would break CF-2
/// (`SignalReceivedWithoutWait`). The next scheduler step that registers a
/// `wait_signal(name)` call drains a matching entry from this buffer and
/// appends the `SignalWait`/`SignalReceived` pair together, in the same
/// transaction, so no event is ever committed half-linked.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingSignal {
    pub name: String,
    pub payload: Payload,
    pub received_at: DateTime<Utc>,
}

/// The persisted `executions` row.
#[derive(Clone, Debug)]
pub struct ExecutionRow {
    pub id: ExecutionId,
    pub workflow_name: String,
    pub inputs: Payload,
    pub status: ExecutionStatus,
    pub result: Option<Payload>,
    pub error: Option<ExecutionError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub timeout_at: Option<DateTime<Utc>>,
    pub parent_id: Option<ExecutionId>,
    pub parent_handle: Option<Pos>,
    pub next_wakeup_at: Option<DateTime<Utc>>,
    pub pending_signals: Vec<PendingSignal>,
}

/// Full replay input for one execution: the row plus its entire journal.
#[derive(Clone, Debug)]
pub struct ExecutionSnapshot {
    pub execution: ExecutionRow,
    pub history: Vec<HistoryEvent>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityTaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
    Canceled,
}

impl std::fmt::Display for ActivityTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
            Self::Canceled => "CANCELED",
        };
        write!(f, "{s}")
    }
}

/// A new row to enqueue in `activity_tasks`, one per `ActivityScheduled`,
/// `TimerScheduled`, or `ChildScheduled` event committed this step.
///
/// `name` is the activity name, or the reserved `__sleep__` for timers.
#[derive(Clone, Debug)]
pub struct NewActivityTask {
    pub execution_id: ExecutionId,
    pub name: String,
    pub args: Payload,
    pub scheduled_event_pos: Pos,
    pub after_time: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub heartbeat_timeout: Option<DateTime<Utc>>,
    pub retry_policy: Option<RetryPolicy>,
}

/// A leased `activity_tasks` row, as handed to the worker loop.
#[derive(Clone, Debug)]
pub struct ActivityTask {
    pub task_id: i64,
    pub execution_id: ExecutionId,
    pub name: String,
    pub args: Payload,
    pub status: ActivityTaskStatus,
    pub attempt: u32,
    pub after_time: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub heartbeat_timeout: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub retry_policy: Option<RetryPolicy>,
    pub scheduled_event_pos: Pos,
    pub locked_by: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
}

/// Outcome of running a leased [`ActivityTask`], reported via
/// [`crate::Store::complete_task`].
#[derive(Clone, Debug)]
pub enum TaskOutcome {
    Completed(Payload),
    /// Failed this attempt; still within retry budget — the task is
    /// re-queued for `attempt + 1` at `retry_after`, no terminal event yet.
    RetryScheduled {
        error: ExecutionError,
        retry_after: DateTime<Utc>,
    },
    /// Retry budget exhausted or a non-retryable failure.
    Failed(ExecutionError),
    TimedOut(ExecutionError),
}

impl TaskOutcome {
    pub fn not_registered(name: &str) -> Self {
        Self::Failed(ExecutionError::not_registered(name))
    }
}

/// One scheduler step's worth of journal/task writes, committed atomically by
/// [`crate::Store::step_commit`].
#[derive(Clone, Debug)]
pub struct StepCommit {
    pub execution_id: ExecutionId,
    pub new_events: Vec<waymark_types::EventType>,
    pub new_tasks: Vec<NewActivityTask>,
    pub status: Option<ExecutionStatus>,
    pub result: Option<Payload>,
    pub error: Option<ExecutionError>,
    pub next_wakeup_at: Option<DateTime<Utc>>,
    /// Pending signals drained from the buffer because this step registered a
    /// matching `SignalWait`.
    pub consumed_signals: Vec<String>,
}

impl StepCommit {
    pub fn new(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            new_events: Vec::new(),
            new_tasks: Vec::new(),
            status: None,
            result: None,
            error: None,
            next_wakeup_at: None,
            consumed_signals: Vec::new(),
        }
    }
}
