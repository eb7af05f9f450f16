//! Structural invariants (S-1 through S-4).
//!
//! Enforce the physical integrity of the journal as an append-only, 0-indexed
//! event log with well-defined lifecycle bookends. These run before any
//! domain-level checks because later invariants rely on structural soundness.

use waymark_types::{EventType, HistoryEvent};

use super::InvariantState;
use crate::error::JournalViolation;

pub(crate) fn check(state: &InvariantState, entry: &HistoryEvent) -> Result<(), JournalViolation> {
    // S-1: pos must equal the 0-based index of this entry.
    debug_assert!(state.len <= u32::MAX as usize);
    let expected = state.len as u32;
    if entry.pos.0 != expected {
        return Err(JournalViolation::NonMonotonicPos {
            entry_index: state.len,
            expected,
            actual: entry.pos.0,
        });
    }

    // S-2: the very first event must be WORKFLOW_STARTED.
    if state.len == 0 && !matches!(entry.kind, EventType::WorkflowStarted { .. }) {
        return Err(JournalViolation::MissingWorkflowStarted {
            first_event: entry.kind.name(),
        });
    }

    // S-3 / S-4: terminal event finality. Once recorded, the journal is
    // sealed: another terminal is a uniqueness violation (S-3), a
    // non-terminal append after it violates "terminal is last" (S-4).
    if let Some(first_at) = state.terminal_pos {
        if entry.kind.is_terminal() {
            return Err(JournalViolation::MultipleTerminalEvents {
                first_at,
                second_at: entry.pos,
            });
        }
        return Err(JournalViolation::TerminalNotLast {
            terminal_pos: first_at,
            journal_len: state.len + 1,
        });
    }

    Ok(())
}
