use waymark_types::{EventType, HistoryEvent, Pos};

/// Returns the first terminal event in journal order, if present.
pub fn terminal_event(entries: &[HistoryEvent]) -> Option<&EventType> {
    entries.iter().find_map(|e| if e.kind.is_terminal() { Some(&e.kind) } else { None })
}

/// Returns true if a `WorkflowCanceled` event appears anywhere in the journal.
pub fn is_canceled(entries: &[HistoryEvent]) -> bool {
    entries.iter().any(|e| matches!(e.kind, EventType::WorkflowCanceled { .. }))
}

/// Counts failed attempts (`ActivityFailed`/`ActivityTimedOut`-before-retry)
/// recorded against a given activity's `scheduled_pos`.
///
/// Since this journal format only writes a terminal event on the *final*
/// attempt (intermediate retries never append a history event — the
/// `ActivityTask` row alone tracks `attempt`), this always returns 0 or 1 and
/// exists mainly so callers can check "has this instance already resolved".
pub fn activity_terminal_pos(entries: &[HistoryEvent], scheduled_pos: Pos) -> Option<Pos> {
    entries.iter().find_map(|e| match &e.kind {
        EventType::ActivityCompleted { scheduled_pos: sp, .. }
        | EventType::ActivityFailed { scheduled_pos: sp, .. }
        | EventType::ActivityTimedOut { scheduled_pos: sp, .. }
            if *sp == scheduled_pos =>
        {
            Some(e.pos)
        }
        _ => None,
    })
}

/// Returns the `pos` of the `SignalWait` matching `name` that is still
/// unresolved as of `entries`, if any, together with the `pos` it was
/// recorded at.
pub fn pending_signal_wait(entries: &[HistoryEvent], name: &str) -> Option<Pos> {
    let mut pending: Option<Pos> = None;
    for e in entries {
        match &e.kind {
            EventType::SignalWait { name: n } if n == name => {
                pending = Some(e.pos);
            }
            EventType::SignalReceived { wait_pos, .. } if pending == Some(*wait_pos) => {
                pending = None;
            }
            _ => {}
        }
    }
    pending
}

/// Returns all activity/child/timer schedule positions with no terminal
/// event yet, in journal order — the set of "still outstanding" work a
/// worker needs to resolve before the execution can make further progress.
pub fn outstanding_schedule_positions(entries: &[HistoryEvent]) -> Vec<Pos> {
    use std::collections::HashSet;

    let mut scheduled = Vec::new();
    let mut resolved = HashSet::new();

    for e in entries {
        match &e.kind {
            EventType::ActivityScheduled { .. }
            | EventType::ChildScheduled { .. }
            | EventType::TimerScheduled { .. } => scheduled.push(e.pos),
            EventType::ActivityCompleted { scheduled_pos, .. }
            | EventType::ActivityFailed { scheduled_pos, .. }
            | EventType::ActivityTimedOut { scheduled_pos, .. }
            | EventType::ChildCompleted { scheduled_pos, .. }
            | EventType::ChildFailed { scheduled_pos, .. }
            | EventType::TimerFired { scheduled_pos } => {
                resolved.insert(*scheduled_pos);
            }
            _ => {}
        }
    }

    scheduled.into_iter().filter(|p| !resolved.contains(p)).collect()
}
