//! Side-effect invariants: activity (SE-1..SE-2) and child-workflow
//! (CH-1..CH-2) schedule/terminal pairing.
//!
//! Both follow the same 2-phase `Scheduled -> {Completed, Failed, TimedOut}`
//! shape, checked independently because activities and children are
//! distinct event kinds in the journal even though their pairing rule is
//! identical.

use waymark_types::{EventType, HistoryEvent};

use super::InvariantState;
use crate::error::JournalViolation;

pub(crate) fn check(state: &InvariantState, entry: &HistoryEvent) -> Result<(), JournalViolation> {
    match &entry.kind {
        EventType::ActivityCompleted { scheduled_pos, .. }
        | EventType::ActivityFailed { scheduled_pos, .. }
        | EventType::ActivityTimedOut { scheduled_pos, .. } => {
            if !state.activity_scheduled.contains(scheduled_pos) {
                return Err(JournalViolation::ActivityTerminalWithoutScheduled {
                    scheduled_pos: *scheduled_pos,
                    offending_pos: entry.pos,
                });
            }
            if let Some(first_at) = state.activity_terminal.get(scheduled_pos) {
                return Err(JournalViolation::ActivityDoubleTerminal {
                    scheduled_pos: *scheduled_pos,
                    first_at: *first_at,
                    second_at: entry.pos,
                });
            }
        }
        EventType::ChildCompleted { scheduled_pos, .. } | EventType::ChildFailed { scheduled_pos, .. } => {
            if !state.child_scheduled.contains(scheduled_pos) {
                return Err(JournalViolation::ChildTerminalWithoutScheduled {
                    scheduled_pos: *scheduled_pos,
                    offending_pos: entry.pos,
                });
            }
            if let Some(first_at) = state.child_terminal.get(scheduled_pos) {
                return Err(JournalViolation::ChildDoubleTerminal {
                    scheduled_pos: *scheduled_pos,
                    first_at: *first_at,
                    second_at: entry.pos,
                });
            }
        }
        _ => {}
    }
    Ok(())
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
    fn se1_terminal_without_scheduled_is_rejected() {
        let state = InvariantState::new();
        let e = entry(0, EventType::ActivityCompleted {
            scheduled_pos: 0.into(),
            result: Payload::null(),
        });

        let err = check(&state, &e).unwrap_err();
        assert_eq!(
            err,
            JournalViolation::ActivityTerminalWithoutScheduled {
                scheduled_pos: 0.into(),
                offending_pos: 0.into(),
            }
        );
    }

    #[test]
    fn se2_double_terminal_for_same_scheduled_pos_is_rejected() {
        let mut activity_scheduled = std::collections::HashSet::new();
        activity_scheduled.insert(0.into());
        let mut activity_terminal = std::collections::HashMap::new();
        activity_terminal.insert(0.into(), 1.into());
        let state = InvariantState {
            activity_scheduled,
            activity_terminal,
            ..Default::default()
        };
        let e = entry(2, EventType::ActivityFailed {
            scheduled_pos: 0.into(),
            error: waymark_types::ExecutionError::new(waymark_types::ErrorKind::ActivityFailed, "x"),
        });

        let err = check(&state, &e).unwrap_err();
        assert_eq!(
            err,
            JournalViolation::ActivityDoubleTerminal {
                scheduled_pos: 0.into(),
                first_at: 1.into(),
                second_at: 2.into(),
            }
        );
    }

    #[test]
    fn ch1_child_terminal_requires_prior_scheduled() {
        let state = InvariantState::new();
        let e = entry(0, EventType::ChildCompleted {
            scheduled_pos: 0.into(),
            result: Payload::null(),
        });

        assert!(matches!(
            check(&state, &e).unwrap_err(),
            JournalViolation::ChildTerminalWithoutScheduled { .. }
        ));
    }

    #[test]
    fn valid_activity_terminal_after_scheduled_passes() {
        let mut activity_scheduled = std::collections::HashSet::new();
        activity_scheduled.insert(0.into());
        let state = InvariantState {
            activity_scheduled,
            ..Default::default()
        };
        let e = entry(1, EventType::ActivityCompleted {
            scheduled_pos: 0.into(),
            result: Payload::null(),
        });

        assert!(check(&state, &e).is_ok());
    }
}
