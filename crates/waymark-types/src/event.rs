use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution_error::ExecutionError;
use crate::ids::Pos;
use crate::payload::Payload;
use crate::retry::RetryPolicy;

/// The reserved activity-task name used for durable timers. An
/// `activity_tasks` row with this name is never dispatched to a registered
/// activity; the worker resolves it directly and the persistence layer
/// records its completion as `TimerFired` rather than `ActivityCompleted`.
pub const SLEEP_ACTIVITY_NAME: &str = "__sleep__";

/// The complete alphabet of durable history events.
///
/// Each variant carries its own payload directly — there is no separate
/// `kind` + free-form JSON split at the Rust type level; `serde`'s
/// externally-tagged representation *is* the `(kind, payload)` pair once
/// persisted, matching one JSONB column per [`crate::HistoryEvent`] row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EventType {
    // ── Lifecycle ──
    /// Always the first event in an execution's journal.
    WorkflowStarted { inputs: Payload },
    /// Body returned normally (terminal).
    WorkflowCompleted { result: Payload },
    /// Body raised an uncaught error (terminal).
    WorkflowFailed { error: ExecutionError },
    /// Worker's timeout sweep observed `timeout_at` elapsed (terminal).
    WorkflowTimedOut,
    /// `cancel_workflow` finalized (terminal).
    WorkflowCanceled { reason: String },

    // ── Activities (3-event Scheduled/Completed|Failed/TimedOut protocol) ──
    /// Intent to invoke an activity. `pos` of this event is the stable handle.
    ActivityScheduled {
        name: String,
        args: Payload,
        retry_policy: Option<RetryPolicy>,
    },
    /// Terminal success for the invocation scheduled at `scheduled_pos`.
    ActivityCompleted { scheduled_pos: Pos, result: Payload },
    /// Terminal failure (retry budget exhausted) for `scheduled_pos`.
    ActivityFailed {
        scheduled_pos: Pos,
        error: ExecutionError,
    },
    /// Schedule-to-close or heartbeat deadline exceeded for `scheduled_pos`.
    ActivityTimedOut {
        scheduled_pos: Pos,
        error: ExecutionError,
    },

    // ── Timers ──
    /// `sleep(seconds)` called. `pos` of this event is the timer's handle.
    TimerScheduled { fire_at: DateTime<Utc> },
    /// Timer due time elapsed. Resolves the timer scheduled at `scheduled_pos`.
    TimerFired { scheduled_pos: Pos },

    // ── Signals ──
    /// `wait_signal(name)` called with no matching delivery yet.
    SignalWait { name: String },
    /// A delivery matching an outstanding `SignalWait` (by name, at or after
    /// its `pos`) was consumed.
    SignalReceived {
        wait_pos: Pos,
        name: String,
        payload: Payload,
    },

    // ── Child workflows (mirrors the activity protocol) ──
    /// Intent to start a child execution. `pos` of this event is the handle.
    ChildScheduled {
        workflow_name: String,
        inputs: Payload,
    },
    /// Child execution completed (terminal for the child, resolver for the parent).
    ChildCompleted { scheduled_pos: Pos, result: Payload },
    /// Child execution failed or was canceled/timed out.
    ChildFailed {
        scheduled_pos: Pos,
        error: ExecutionError,
    },

    // ── Versioning ──
    /// First call to `get_version(change_id, ...)`. Pins the version for all
    /// future replays of this execution.
    VersionMarker { change_id: String, version: i32 },
    /// First call to `patched(change_id)` or `deprecate_patch(change_id)`.
    PatchMarker { change_id: String, patched: bool },
}

impl EventType {
    /// Static variant name, used for error messages, logging, and the
    /// persisted discriminant when a host prefers storing `kind` and
    /// `payload` as separate columns.
    pub fn name(&self) -> &'static str {
        match self {
            Self::WorkflowStarted { .. } => "WORKFLOW_STARTED",
            Self::WorkflowCompleted { .. } => "WORKFLOW_COMPLETED",
            Self::WorkflowFailed { .. } => "WORKFLOW_FAILED",
            Self::WorkflowTimedOut => "WORKFLOW_TIMED_OUT",
            Self::WorkflowCanceled { .. } => "WORKFLOW_CANCELED",
            Self::ActivityScheduled { .. } => "ACTIVITY_SCHEDULED",
            Self::ActivityCompleted { .. } => "ACTIVITY_COMPLETED",
            Self::ActivityFailed { .. } => "ACTIVITY_FAILED",
            Self::ActivityTimedOut { .. } => "ACTIVITY_TIMED_OUT",
            Self::TimerScheduled { .. } => "TIMER_SCHEDULED",
            Self::TimerFired { .. } => "TIMER_FIRED",
            Self::SignalWait { .. } => "SIGNAL_WAIT",
            Self::SignalReceived { .. } => "SIGNAL_RECEIVED",
            Self::ChildScheduled { .. } => "CHILD_SCHEDULED",
            Self::ChildCompleted { .. } => "CHILD_COMPLETED",
            Self::ChildFailed { .. } => "CHILD_FAILED",
            Self::VersionMarker { .. } => "VERSION_MARKER",
            Self::PatchMarker { .. } => "PATCH_MARKER",
        }
    }

    /// Whether this event ends the execution (Completed, Failed, TimedOut, or
    /// Canceled).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted { .. }
                | Self::WorkflowFailed { .. }
                | Self::WorkflowTimedOut
                | Self::WorkflowCanceled { .. }
        )
    }

    /// Whether this event is one of the three "schedule" kinds that allocate
    /// a stable handle at its own `pos`.
    pub fn is_schedule(&self) -> bool {
        matches!(
            self,
            Self::ActivityScheduled { .. } | Self::TimerScheduled { .. } | Self::ChildScheduled { .. }
        )
    }
}
