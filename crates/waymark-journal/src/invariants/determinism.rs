//! Determinism invariants (V-1, P-1).
//!
//! `get_version`/`patched` only record a marker on an execution's *first*
//! call for a given `change_id` — every later replay trusts the recorded
//! value instead of re-evaluating the code path. A second marker for the
//! same `change_id` means the workflow body itself branched differently
//! across replays, which is the nondeterminism this journal format is meant
//! to catch structurally rather than leaving to runtime luck.

use waymark_types::{EventType, HistoryEvent};

use super::InvariantState;
use crate::error::JournalViolation;

pub(crate) fn check(state: &InvariantState, entry: &HistoryEvent) -> Result<(), JournalViolation> {
    match &entry.kind {
        EventType::VersionMarker { change_id, .. } => {
            if let Some(first_at) = state.version_markers.get(change_id) {
                if *first_at != entry.pos {
                    return Err(JournalViolation::DuplicateVersionMarker {
                        change_id: change_id.clone(),
                        second_at: entry.pos,
                    });
                }
            }
        }
        EventType::PatchMarker { change_id, .. } => {
            if let Some(first_at) = state.patch_markers.get(change_id) {
                if *first_at != entry.pos {
                    return Err(JournalViolation::DuplicatePatchMarker {
                        change_id: change_id.clone(),
                        second_at: entry.pos,
                    });
                }
            }
        }
        _ => {}
    }
    Ok(())
}
