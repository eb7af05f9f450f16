//! Journal invariant checking engine.
//!
//! Provides two modes of validation:
//! - **Incremental** ([`InvariantState::check_append`]): O(1) per entry via
//!   auxiliary state. Used at commit time to reject invalid entries before
//!   they hit the journal.
//! - **Batch** ([`validate_journal`]): O(n) full scan that collects all
//!   violations. Used for diagnostics and journal recovery.
//!
//! Invariants are grouped into four sub-modules:
//! - [`structural`] (S-1..S-4): pos numbering, lifecycle bookends, terminal
//!   uniqueness and finality.
//! - [`side_effects`] (SE-1..SE-2, CH-1..CH-2): activity and child-workflow
//!   schedule/terminal pairing.
//! - [`control_flow`] (CF-1..CF-3): timer and signal pairing.
//! - [`determinism`] (V-1, P-1): version/patch marker uniqueness.
//!
//! This module audits a journal *offline*. The live analogue — rejecting a
//! replay the instant it diverges from recorded history — is enforced by
//! `waymark-engine`'s `Context`, which consults the same kinds of pairings
//! incrementally as the workflow body runs and fails the execution with
//! `NONDETERMINISM` on the first mismatch rather than waiting for an audit.

mod control_flow;
mod determinism;
mod side_effects;
mod structural;

use std::collections::{HashMap, HashSet};

use waymark_types::{EventType, ExecutionJournal, HistoryEvent, Pos};

use crate::error::JournalViolation;

/// Accumulated auxiliary state for O(1) incremental invariant checking.
#[derive(Clone, Debug, Default)]
pub struct InvariantState {
    pub(crate) len: usize,
    pub(crate) terminal_pos: Option<Pos>,

    pub(crate) activity_scheduled: HashSet<Pos>,
    pub(crate) activity_terminal: HashMap<Pos, Pos>,

    pub(crate) child_scheduled: HashSet<Pos>,
    pub(crate) child_terminal: HashMap<Pos, Pos>,

    pub(crate) timer_scheduled: HashSet<Pos>,
    pub(crate) timer_fired: HashMap<Pos, Pos>,

    pub(crate) signal_wait: HashSet<Pos>,
    pub(crate) signal_resolved: HashMap<Pos, Pos>,

    pub(crate) version_markers: HashMap<String, Pos>,
    pub(crate) patch_markers: HashMap<String, Pos>,
}

impl InvariantState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and ingest a single journal entry (incremental path).
    pub fn check_append(&mut self, entry: &HistoryEvent) -> Result<(), JournalViolation> {
        structural::check(self, entry)?;
        side_effects::check(self, entry)?;
        control_flow::check(self, entry)?;
        determinism::check(self, entry)?;
        self.apply_entry(entry);
        Ok(())
    }

    /// Run all invariant groups, collecting up to one violation per group
    /// instead of short-circuiting, so `validate_journal` can surface
    /// multiple independent issues from a single corrupt journal.
    fn collect_entry_violations(&self, entry: &HistoryEvent, violations: &mut Vec<JournalViolation>) {
        if let Err(v) = structural::check(self, entry) {
            violations.push(v);
        }
        if let Err(v) = side_effects::check(self, entry) {
            violations.push(v);
        }
        if let Err(v) = control_flow::check(self, entry) {
            violations.push(v);
        }
        if let Err(v) = determinism::check(self, entry) {
            violations.push(v);
        }
    }

    fn apply_entry(&mut self, entry: &HistoryEvent) {
        match &entry.kind {
            EventType::WorkflowCompleted { .. }
            | EventType::WorkflowFailed { .. }
            | EventType::WorkflowTimedOut
            | EventType::WorkflowCanceled { .. } => {
                self.terminal_pos.get_or_insert(entry.pos);
            }
            EventType::ActivityScheduled { .. } => {
                self.activity_scheduled.insert(entry.pos);
            }
            EventType::ActivityCompleted { scheduled_pos, .. }
            | EventType::ActivityFailed { scheduled_pos, .. }
            | EventType::ActivityTimedOut { scheduled_pos, .. } => {
                self.activity_terminal.entry(*scheduled_pos).or_insert(entry.pos);
            }
            EventType::ChildScheduled { .. } => {
                self.child_scheduled.insert(entry.pos);
            }
            EventType::ChildCompleted { scheduled_pos, .. }
            | EventType::ChildFailed { scheduled_pos, .. } => {
                self.child_terminal.entry(*scheduled_pos).or_insert(entry.pos);
            }
            EventType::TimerScheduled { .. } => {
                self.timer_scheduled.insert(entry.pos);
            }
            EventType::TimerFired { scheduled_pos } => {
                self.timer_fired.entry(*scheduled_pos).or_insert(entry.pos);
            }
            EventType::SignalWait { .. } => {
                self.signal_wait.insert(entry.pos);
            }
            EventType::SignalReceived { wait_pos, .. } => {
                self.signal_resolved.entry(*wait_pos).or_insert(entry.pos);
            }
            EventType::VersionMarker { change_id, .. } => {
                self.version_markers.entry(change_id.clone()).or_insert(entry.pos);
            }
            EventType::PatchMarker { change_id, .. } => {
                self.patch_markers.entry(change_id.clone()).or_insert(entry.pos);
            }
            EventType::WorkflowStarted { .. } => {}
        }
        self.len += 1;
    }
}

/// Batch-validate an entire journal, returning all detected violations.
pub fn validate_journal(journal: &ExecutionJournal) -> Vec<JournalViolation> {
    if journal.entries.is_empty() {
        return vec![JournalViolation::MissingWorkflowStarted { first_event: "<empty>" }];
    }

    let mut state = InvariantState::new();
    let mut violations = Vec::new();

    for entry in &journal.entries {
        state.collect_entry_violations(entry, &mut violations);
        state.apply_entry(entry);
    }

    violations
}
