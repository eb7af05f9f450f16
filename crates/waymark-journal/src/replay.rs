use std::collections::HashMap;

use waymark_types::{EventType, ExecutionError, HistoryEvent, Payload, Pos};

/// Replay-time cached outcome for a resolved activity or child workflow.
#[derive(Clone, Debug, PartialEq)]
pub enum InvokeOutcome {
    Completed(Payload),
    Failed(ExecutionError),
    TimedOut(ExecutionError),
}

/// Batch-built replay cache keyed by the `pos` of the originating schedule
/// event (activities, timers, children) or wait event (signals).
///
/// Construction is a single O(n) scan over journal entries. This is what lets
/// the Context answer "has this already happened?" without rescanning on
/// every operation.
#[derive(Clone, Debug, Default)]
pub struct ReplayCache {
    activity: HashMap<Pos, InvokeOutcome>,
    child: HashMap<Pos, InvokeOutcome>,
    timer_fired: HashMap<Pos, Pos>,
    signal: HashMap<Pos, (String, Payload)>,
    version_markers: HashMap<String, i32>,
    patch_markers: HashMap<String, bool>,
}

impl ReplayCache {
    pub fn build(entries: &[HistoryEvent]) -> Self {
        let mut cache = Self::default();

        for entry in entries {
            match &entry.kind {
                EventType::ActivityCompleted { scheduled_pos, result } => {
                    cache
                        .activity
                        .insert(*scheduled_pos, InvokeOutcome::Completed(result.clone()));
                }
                EventType::ActivityFailed { scheduled_pos, error } => {
                    cache
                        .activity
                        .insert(*scheduled_pos, InvokeOutcome::Failed(error.clone()));
                }
                EventType::ActivityTimedOut { scheduled_pos, error } => {
                    cache
                        .activity
                        .insert(*scheduled_pos, InvokeOutcome::TimedOut(error.clone()));
                }
                EventType::ChildCompleted { scheduled_pos, result } => {
                    cache
                        .child
                        .insert(*scheduled_pos, InvokeOutcome::Completed(result.clone()));
                }
                EventType::ChildFailed { scheduled_pos, error } => {
                    cache
                        .child
                        .insert(*scheduled_pos, InvokeOutcome::Failed(error.clone()));
                }
                EventType::TimerFired { scheduled_pos } => {
                    cache.timer_fired.insert(*scheduled_pos, entry.pos);
                }
                EventType::SignalReceived { wait_pos, name, payload } => {
                    cache.signal.insert(*wait_pos, (name.clone(), payload.clone()));
                }
                EventType::VersionMarker { change_id, version } => {
                    cache.version_markers.entry(change_id.clone()).or_insert(*version);
                }
                EventType::PatchMarker { change_id, patched } => {
                    cache.patch_markers.entry(change_id.clone()).or_insert(*patched);
                }
                _ => {}
            }
        }

        cache
    }

    pub fn activity_outcome(&self, scheduled_pos: Pos) -> Option<&InvokeOutcome> {
        self.activity.get(&scheduled_pos)
    }

    pub fn child_outcome(&self, scheduled_pos: Pos) -> Option<&InvokeOutcome> {
        self.child.get(&scheduled_pos)
    }

    pub fn is_timer_fired(&self, scheduled_pos: Pos) -> bool {
        self.timer_fired.contains_key(&scheduled_pos)
    }

    pub fn signal_payload(&self, wait_pos: Pos) -> Option<&Payload> {
        self.signal.get(&wait_pos).map(|(_, payload)| payload)
    }

    pub fn version(&self, change_id: &str) -> Option<i32> {
        self.version_markers.get(change_id).copied()
    }

    pub fn patched(&self, change_id: &str) -> Option<bool> {
        self.patch_markers.get(change_id).copied()
    }

    pub fn len(&self) -> usize {
        self.activity.len()
            + self.child.len()
            + self.timer_fired.len()
            + self.signal.len()
            + self.version_markers.len()
            + self.patch_markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn entry(pos: u32, kind: EventType) -> HistoryEvent {
        HistoryEvent {
            pos: pos.into(),
            created_at: Utc::now(),
            kind,
        }
    }

    #[test]
    fn build_caches_all_supported_event_kinds() {
        let entries = vec![
            entry(0, EventType::ActivityCompleted {
                scheduled_pos: 10.into(),
                result: Payload::encode(&5).unwrap(),
            }),
            entry(1, EventType::TimerFired { scheduled_pos: 11.into() }),
            entry(2, EventType::SignalReceived {
                wait_pos: 12.into(),
                name: "go".into(),
                payload: Payload::encode(&"x").unwrap(),
            }),
            entry(3, EventType::VersionMarker {
                change_id: "c1".into(),
                version: 2,
            }),
            entry(4, EventType::PatchMarker {
                change_id: "p1".into(),
                patched: true,
            }),
        ];

        let cache = ReplayCache::build(&entries);

        assert_eq!(cache.len(), 5);
        assert!(matches!(
            cache.activity_outcome(10.into()),
            Some(InvokeOutcome::Completed(_))
        ));
        assert!(cache.is_timer_fired(11.into()));
        assert_eq!(
            cache.signal_payload(12.into()).unwrap().decode::<String>().unwrap(),
            "x"
        );
        assert_eq!(cache.version("c1"), Some(2));
        assert_eq!(cache.patched("p1"), Some(true));
    }

    #[test]
    fn unresolved_pos_has_no_cached_outcome() {
        let cache = ReplayCache::build(&[]);
        assert!(cache.activity_outcome(0.into()).is_none());
        assert!(cache.is_empty());
    }
}
