use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical category for an execution, activity, or scheduling failure.
///
/// Coarse-grained by design: used for retry/propagation policy decisions and
/// as an observability dimension, not for fine-grained error matching.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A workflow, activity, or query name had no registered implementation.
    NotRegistered,
    /// A value crossing a persistence boundary was not JSON round-trippable.
    Serialization,
    /// An activity body raised; subject to the activity's retry policy.
    ActivityFailed,
    /// Schedule-to-close or heartbeat deadline exceeded; subject to retry.
    ActivityTimedOut,
    /// Execution-level timeout observed by the worker's timeout sweep.
    WorkflowTimedOut,
    /// User-initiated cancellation.
    Canceled,
    /// Replay detected an event-kind mismatch against recorded history.
    Nondeterminism,
    /// Unhandled engine error with no more specific category.
    Internal,
}

/// Structured payload for execution failures, activity failures, and retry
/// diagnostics — replaces raw strings with a shape that is easy to classify
/// (`kind`), render (`message`), and enrich (`detail`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    pub detail: Option<String>,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn new_with_detail(
        kind: ErrorKind,
        message: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: Some(detail.into()),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn not_registered(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ErrorKind::NotRegistered, format!("not registered: {name}"))
    }

    pub fn nondeterminism(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Nondeterminism, message)
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(ref detail) = self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ExecutionError {}
