use waymark_types::Pos;

/// Describes a specific journal invariant violation.
///
/// Grouped: Structural (S-1..S-4), Side Effects (SE-1..SE-2, CH-1..CH-2),
/// Control Flow (CF-1..CF-2), Determinism (V-1, P-1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JournalViolation {
    /// S-1: `pos` must equal its array index (0-indexed, strict equality).
    NonMonotonicPos {
        entry_index: usize,
        expected: u32,
        actual: u32,
    },
    /// S-2: the first event in every journal must be `WorkflowStarted`.
    MissingWorkflowStarted { first_event: &'static str },
    /// S-3: at most one terminal event per journal.
    MultipleTerminalEvents { first_at: Pos, second_at: Pos },
    /// S-4: a terminal event must be the last entry in the journal.
    TerminalNotLast { terminal_pos: Pos, journal_len: usize },

    /// SE-1: an activity terminal event requires a preceding `ActivityScheduled`
    /// at the referenced `scheduled_pos`.
    ActivityTerminalWithoutScheduled { scheduled_pos: Pos, offending_pos: Pos },
    /// SE-2: at most one terminal event (`Completed`/`Failed`/`TimedOut`) per
    /// scheduled activity instance.
    ActivityDoubleTerminal {
        scheduled_pos: Pos,
        first_at: Pos,
        second_at: Pos,
    },

    /// CH-1: a child terminal event requires a preceding `ChildScheduled` at
    /// the referenced `scheduled_pos`.
    ChildTerminalWithoutScheduled { scheduled_pos: Pos, offending_pos: Pos },
    /// CH-2: at most one terminal event per scheduled child instance.
    ChildDoubleTerminal {
        scheduled_pos: Pos,
        first_at: Pos,
        second_at: Pos,
    },

    /// CF-1: `TimerFired` requires a preceding `TimerScheduled` at the
    /// referenced `scheduled_pos`, and fires at most once per timer.
    TimerFiredWithoutScheduled { scheduled_pos: Pos, fired_pos: Pos },
    TimerDoubleFired {
        scheduled_pos: Pos,
        first_at: Pos,
        second_at: Pos,
    },

    /// CF-2: `SignalReceived` requires a preceding `SignalWait` with matching
    /// name at the referenced `wait_pos`.
    SignalReceivedWithoutWait { wait_pos: Pos, received_pos: Pos },
    /// CF-3: a given `SignalWait` may be resolved by at most one `SignalReceived`.
    SignalWaitDoubleResolved {
        wait_pos: Pos,
        first_at: Pos,
        second_at: Pos,
    },

    /// V-1: `VersionMarker` for a given `change_id` may appear at most once.
    DuplicateVersionMarker { change_id: String, second_at: Pos },
    /// P-1: `PatchMarker` for a given `change_id` may appear at most once.
    DuplicatePatchMarker { change_id: String, second_at: Pos },
}

/// Errors produced by journal operations.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("journal is empty")]
    EmptyJournal,
    #[error("invariant violation: {0}")]
    InvariantViolation(JournalViolation),
}

impl std::fmt::Display for JournalViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonMonotonicPos {
                entry_index,
                expected,
                actual,
            } => write!(
                f,
                "S-1: non-monotonic pos at index {entry_index}: expected {expected}, got {actual}"
            ),
            Self::MissingWorkflowStarted { first_event } => write!(
                f,
                "S-2: first event must be WORKFLOW_STARTED, got {first_event}"
            ),
            Self::MultipleTerminalEvents { first_at, second_at } => write!(
                f,
                "S-3: multiple terminal events at pos {first_at} and {second_at}"
            ),
            Self::TerminalNotLast {
                terminal_pos,
                journal_len,
            } => write!(
                f,
                "S-4: terminal event at pos {terminal_pos} is not last (journal len {journal_len})"
            ),
            Self::ActivityTerminalWithoutScheduled {
                scheduled_pos,
                offending_pos,
            } => write!(
                f,
                "SE-1: activity terminal at pos {offending_pos} references unscheduled pos {scheduled_pos}"
            ),
            Self::ActivityDoubleTerminal {
                scheduled_pos,
                first_at,
                second_at,
            } => write!(
                f,
                "SE-2: activity scheduled at {scheduled_pos} terminated twice, at {first_at} and {second_at}"
            ),
            Self::ChildTerminalWithoutScheduled {
                scheduled_pos,
                offending_pos,
            } => write!(
                f,
                "CH-1: child terminal at pos {offending_pos} references unscheduled pos {scheduled_pos}"
            ),
            Self::ChildDoubleTerminal {
                scheduled_pos,
                first_at,
                second_at,
            } => write!(
                f,
                "CH-2: child scheduled at {scheduled_pos} terminated twice, at {first_at} and {second_at}"
            ),
            Self::TimerFiredWithoutScheduled {
                scheduled_pos,
                fired_pos,
            } => write!(
                f,
                "CF-1: timer fired at pos {fired_pos} references unscheduled pos {scheduled_pos}"
            ),
            Self::TimerDoubleFired {
                scheduled_pos,
                first_at,
                second_at,
            } => write!(
                f,
                "CF-1: timer scheduled at {scheduled_pos} fired twice, at {first_at} and {second_at}"
            ),
            Self::SignalReceivedWithoutWait { wait_pos, received_pos } => write!(
                f,
                "CF-2: signal received at pos {received_pos} references unknown wait at pos {wait_pos}"
            ),
            Self::SignalWaitDoubleResolved {
                wait_pos,
                first_at,
                second_at,
            } => write!(
                f,
                "CF-3: wait at pos {wait_pos} resolved twice, at {first_at} and {second_at}"
            ),
            Self::DuplicateVersionMarker { change_id, second_at } => write!(
                f,
                "V-1: duplicate VERSION_MARKER for change_id '{change_id}' at pos {second_at}"
            ),
            Self::DuplicatePatchMarker { change_id, second_at } => write!(
                f,
                "P-1: duplicate PATCH_MARKER for change_id '{change_id}' at pos {second_at}"
            ),
        }
    }
}
