use thiserror::Error;
use waymark_persistence::StoreError;
use waymark_types::{ExecutionError, ExecutionId};

/// Engine-level failures: surfaced from the Public API and the worker loop,
/// never from inside a workflow body (those fail via `WorkflowSignal::Failed`
/// and are recorded as a terminal `HistoryEvent` instead).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("execution {0} not found")]
    NotFound(ExecutionId),

    #[error("workflow {0:?} is not registered")]
    WorkflowNotRegistered(String),

    #[error("activity {0:?} is not registered")]
    ActivityNotRegistered(String),

    #[error("query {0:?} is not registered on workflow {1:?}")]
    QueryNotRegistered(String, String),

    #[error("wait_workflow timed out before execution reached a terminal state")]
    WaitTimedOut,

    /// A non-`COMPLETED` terminal status, surfaced to `wait_workflow` callers.
    #[error("workflow did not complete: {0}")]
    WorkflowFailed(ExecutionError),

    /// A registered query handler raised.
    #[error("query handler failed: {0}")]
    QueryFailed(ExecutionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
