use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::EventType;
use crate::ids::{ExecutionId, Pos};

/// A single entry in an execution's append-only event log.
///
/// `pos` is 0-indexed and dense; `created_at` is wall-clock, retained for
/// debugging and audit but never consulted by replay logic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub pos: Pos,
    pub created_at: DateTime<Utc>,
    pub kind: EventType,
}

/// The execution's coarse status, as tracked on the `executions` row.
///
/// There is no distinct "blocked" variant: a non-terminal execution is
/// always PENDING between
/// scheduler steps (parked on `next_wakeup_at`) or transiently RUNNING while
/// a step is in flight. What it is waiting on is a property of its pending
/// `ActivityTask`s/timers, not of the execution row itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
    Canceled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::TimedOut | Self::Canceled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
            Self::Canceled => "CANCELED",
        };
        write!(f, "{s}")
    }
}

/// The full journal for one execution. A persistence-level read model: the
/// concatenation of all `HistoryEvent`s committed across every scheduler
/// step this execution has been through.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionJournal {
    pub execution_id: ExecutionId,
    pub entries: Vec<HistoryEvent>,
}

impl ExecutionJournal {
    pub fn next_pos(&self) -> Pos {
        match self.entries.last() {
            Some(e) => e.pos.next(),
            None => Pos::ZERO,
        }
    }
}
