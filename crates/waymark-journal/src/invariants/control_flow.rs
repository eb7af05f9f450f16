//! Control-flow invariants (CF-1 through CF-3).
//!
//! Timers follow a 2-phase `Scheduled -> Fired` lifecycle (CF-1). Signals
//! follow a `Wait -> Received` lifecycle: a `SignalReceived` must reference
//! an existing `SignalWait` (CF-2), and a given wait may be resolved at most
//! once (CF-3).

use waymark_types::{EventType, HistoryEvent};

use super::InvariantState;
use crate::error::JournalViolation;

pub(crate) fn check(state: &InvariantState, entry: &HistoryEvent) -> Result<(), JournalViolation> {
    match &entry.kind {
        EventType::TimerFired { scheduled_pos } => {
            if !state.timer_scheduled.contains(scheduled_pos) {
                return Err(JournalViolation::TimerFiredWithoutScheduled {
                    scheduled_pos: *scheduled_pos,
                    fired_pos: entry.pos,
                });
            }
            if let Some(first_at) = state.timer_fired.get(scheduled_pos) {
                return Err(JournalViolation::TimerDoubleFired {
                    scheduled_pos: *scheduled_pos,
                    first_at: *first_at,
                    second_at: entry.pos,
                });
            }
        }
        EventType::SignalReceived { wait_pos, .. } => {
            if !state.signal_wait.contains(wait_pos) {
                return Err(JournalViolation::SignalReceivedWithoutWait {
                    wait_pos: *wait_pos,
                    received_pos: entry.pos,
                });
            }
            if let Some(first_at) = state.signal_resolved.get(wait_pos) {
                return Err(JournalViolation::SignalWaitDoubleResolved {
                    wait_pos: *wait_pos,
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
    fn cf1_timer_fired_without_scheduled_is_rejected() {
        let state = InvariantState::new();
        let e = entry(0, EventType::TimerFired { scheduled_pos: 0.into() });

        assert!(matches!(
            check(&state, &e).unwrap_err(),
            JournalViolation::TimerFiredWithoutScheduled { .. }
        ));
    }

    #[test]
    fn cf2_signal_received_without_wait_is_rejected() {
        let state = InvariantState::new();
        let e = entry(0, EventType::SignalReceived {
            wait_pos: 0.into(),
            name: "go".into(),
            payload: Payload::null(),
        });

        assert!(matches!(
            check(&state, &e).unwrap_err(),
            JournalViolation::SignalReceivedWithoutWait { .. }
        ));
    }

    #[test]
    fn cf3_wait_resolved_twice_is_rejected() {
        let mut signal_wait = std::collections::HashSet::new();
        signal_wait.insert(0.into());
        let mut signal_resolved = std::collections::HashMap::new();
        signal_resolved.insert(0.into(), 1.into());
        let state = InvariantState {
            signal_wait,
            signal_resolved,
            ..Default::default()
        };
        let e = entry(2, EventType::SignalReceived {
            wait_pos: 0.into(),
            name: "go".into(),
            payload: Payload::null(),
        });

        assert!(matches!(
            check(&state, &e).unwrap_err(),
            JournalViolation::SignalWaitDoubleResolved { .. }
        ));
    }

    #[test]
    fn valid_timer_fired_after_scheduled_passes() {
        let mut timer_scheduled = std::collections::HashSet::new();
        timer_scheduled.insert(0.into());
        let state = InvariantState {
            timer_scheduled,
            ..Default::default()
        };
        let e = entry(1, EventType::TimerFired { scheduled_pos: 0.into() });

        assert!(check(&state, &e).is_ok());
    }
}
