use waymark_types::{EventType, ExecutionStatus, HistoryEvent};

/// Derive the current execution status by replaying journal events
/// left-to-right.
///
/// This is the canonical recovery path: load persisted entries and fold them
/// into the latest `ExecutionStatus`. Complexity: O(n) over `entries.len()`.
///
/// Precondition: journal invariants are enforced upstream (S-2 guarantees the
/// first event is `WorkflowStarted`), so an empty journal is treated as misuse.
pub fn derive_status(entries: &[HistoryEvent]) -> ExecutionStatus {
    debug_assert!(
        !entries.is_empty(),
        "derive_status expects non-empty journal (S-2: starts_with_started)"
    );
    entries
        .iter()
        .fold(ExecutionStatus::Pending, |status, entry| {
            derive_next_status(status, &entry.kind)
        })
}

/// Apply a single-event status transition.
///
/// Use this in append-time paths where status is already known and a new
/// event arrives, for O(1) incremental updates instead of re-folding the
/// journal. Semantics match one step of `derive_status`.
pub(crate) fn derive_next_status(current: ExecutionStatus, event: &EventType) -> ExecutionStatus {
    match event {
        EventType::WorkflowStarted { .. } => ExecutionStatus::Running,
        EventType::WorkflowCompleted { .. } => ExecutionStatus::Completed,
        EventType::WorkflowFailed { .. } => ExecutionStatus::Failed,
        EventType::WorkflowTimedOut => ExecutionStatus::TimedOut,
        EventType::WorkflowCanceled { .. } => ExecutionStatus::Canceled,
        _ => current,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use waymark_types::Payload;

    use super::*;

    fn entry(pos: u32, kind: EventType) -> HistoryEvent {
        HistoryEvent {
            pos: pos.into(),
            created_at: Utc::now(),
            kind,
        }
    }

    #[test]
    fn derive_status_matches_incremental_transitions() {
        let entries = vec![
            entry(0, EventType::WorkflowStarted { inputs: Payload::null() }),
            entry(1, EventType::ActivityScheduled {
                name: "add".into(),
                args: Payload::null(),
                retry_policy: None,
            }),
            entry(2, EventType::WorkflowCompleted { result: Payload::null() }),
        ];

        let folded = derive_status(&entries);
        let incremental = entries
            .iter()
            .fold(ExecutionStatus::Pending, |s, e| derive_next_status(s, &e.kind));

        assert_eq!(folded, incremental);
        assert_eq!(folded, ExecutionStatus::Completed);
    }

    #[test]
    fn non_lifecycle_events_do_not_change_status() {
        let status = derive_next_status(
            ExecutionStatus::Running,
            &EventType::TimerScheduled { fire_at: Utc::now() },
        );
        assert_eq!(status, ExecutionStatus::Running);
    }
}
