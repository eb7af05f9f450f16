//! The engine's public surface: `start_workflow`, `wait_workflow`,
//! `signal_workflow`, `cancel_workflow`, `query_workflow`.
//!
//! Free functions over `&dyn Store`/`&Registry` rather than methods on a
//! shared handle type, so the CLI and any embedding host call exactly the
//! same code path the worker itself uses.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use waymark_persistence::{NewExecution, Store};
use waymark_types::{ExecutionId, ExecutionStatus, Payload};

use crate::error::EngineError;
use crate::registry::Registry;

/// Creates a new execution, `PENDING` with a `WORKFLOW_STARTED` event and
/// `next_wakeup_at = now`, so the next worker tick picks it up immediately.
/// Does not validate `workflow_name` against the registry — an unregistered
/// name fails at the first scheduler step instead (`NOT_REGISTERED`), never
/// here.
pub async fn start_workflow<S: Store + ?Sized>(
    store: &S,
    workflow_name: impl Into<String>,
    inputs: Payload,
    timeout_at: Option<DateTime<Utc>>,
) -> Result<ExecutionId, EngineError> {
    let id = store
        .create_execution(NewExecution {
            workflow_name: workflow_name.into(),
            inputs,
            timeout_at,
            parent_id: None,
            parent_handle: None,
        })
        .await?;
    Ok(id)
}

/// Polls `id` every `poll_interval` until it reaches a terminal status,
/// returning its result on `COMPLETED` or `EngineError::WorkflowFailed` for
/// any other terminal. `timeout` bounds the poll itself (the caller's
/// patience), independent of the execution's own `timeout_at` deadline.
pub async fn wait_workflow<S: Store + ?Sized>(
    store: &S,
    id: ExecutionId,
    poll_interval: StdDuration,
    timeout: Option<StdDuration>,
) -> Result<Payload, EngineError> {
    let deadline = timeout.map(|d| std::time::Instant::now() + d);
    loop {
        let snapshot = store.snapshot(id).await?.ok_or(EngineError::NotFound(id))?;
        let execution = snapshot.execution;
        match execution.status {
            ExecutionStatus::Completed => return Ok(execution.result.unwrap_or_default()),
            status if status.is_terminal() => {
                let error = execution.error.unwrap_or_else(|| {
                    waymark_types::ExecutionError::new(waymark_types::ErrorKind::Internal, "terminal with no recorded error")
                });
                return Err(EngineError::WorkflowFailed(error));
            }
            _ => {}
        }
        if deadline.is_some_and(|d| std::time::Instant::now() >= d) {
            return Err(EngineError::WaitTimedOut);
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Delivers a signal. Silently accepted (and silently dropped) against an
/// already-terminal execution — documented behavior, not an error.
pub async fn signal_workflow<S: Store + ?Sized>(
    store: &S,
    id: ExecutionId,
    name: impl Into<String>,
    payload: Payload,
) -> Result<(), EngineError> {
    store.signal_execution(id, name.into(), payload).await?;
    Ok(())
}

/// Cancels `id`: appends `WORKFLOW_CANCELED`, marks it `CANCELED`, and
/// (unless `keep_queued` is set) cancels its `QUEUED` activity tasks and
/// recurses into every non-terminal child. Idempotent against an
/// already-terminal execution.
pub async fn cancel_workflow<S: Store + ?Sized>(
    store: &S,
    id: ExecutionId,
    reason: impl Into<String>,
    keep_queued: bool,
) -> Result<(), EngineError> {
    let reason = reason.into();
    if !keep_queued {
        store.cancel_queued_tasks(id).await?;
    }
    store.cancel_execution(id, reason.clone()).await?;
    for child_id in store.list_children(id).await? {
        Box::pin(cancel_workflow(store, child_id, reason.clone(), keep_queued)).await?;
    }
    Ok(())
}

/// Calls a registered query handler against a read-only snapshot of `id`.
/// Never mutates state — there is no commit path here at all.
pub async fn query_workflow<S: Store + ?Sized>(
    store: &S,
    registry: &Registry,
    id: ExecutionId,
    workflow_name: &str,
    query_name: &str,
    payload: Payload,
) -> Result<Payload, EngineError> {
    let snapshot = store.snapshot(id).await?.ok_or(EngineError::NotFound(id))?;
    let handler = registry
        .lookup_query(workflow_name, query_name)
        .ok_or_else(|| EngineError::QueryNotRegistered(workflow_name.to_string(), query_name.to_string()))?;
    handler(&snapshot, payload).map_err(EngineError::QueryFailed)
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use waymark_persistence::MemoryStore;
    use waymark_types::{ErrorKind, EventType, ExecutionError};

    use super::*;

    #[tokio::test]
    async fn start_workflow_is_immediately_waitable_once_completed() {
        let store = MemoryStore::new();
        let id = start_workflow(&store, "noop", Payload::null(), None).await.unwrap();

        store
            .step_commit(waymark_persistence::StepCommit {
                execution_id: id,
                new_events: vec![EventType::WorkflowCompleted { result: Payload::encode(&7).unwrap() }],
                new_tasks: Vec::new(),
                status: Some(ExecutionStatus::Completed),
                result: Some(Payload::encode(&7).unwrap()),
                error: None,
                next_wakeup_at: None,
                consumed_signals: Vec::new(),
            })
            .await
            .unwrap();

        let result = wait_workflow(&store, id, StdDuration::from_millis(1), Some(StdDuration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(result.decode::<i32>().unwrap(), 7);
    }

    #[tokio::test]
    async fn wait_workflow_times_out_against_a_never_completing_execution() {
        let store = MemoryStore::new();
        let id = start_workflow(&store, "stuck", Payload::null(), None).await.unwrap();
        let result = wait_workflow(&store, id, StdDuration::from_millis(1), Some(StdDuration::from_millis(5))).await;
        assert!(matches!(result, Err(EngineError::WaitTimedOut)));
    }

    #[tokio::test]
    async fn wait_workflow_surfaces_a_failed_terminal_status() {
        let store = MemoryStore::new();
        let id = start_workflow(&store, "will_fail", Payload::null(), None).await.unwrap();
        store
            .step_commit(waymark_persistence::StepCommit {
                execution_id: id,
                new_events: Vec::new(),
                new_tasks: Vec::new(),
                status: Some(ExecutionStatus::Failed),
                result: None,
                error: Some(ExecutionError::new(ErrorKind::Internal, "boom")),
                next_wakeup_at: None,
                consumed_signals: Vec::new(),
            })
            .await
            .unwrap();

        let result = wait_workflow(&store, id, StdDuration::from_millis(1), None).await;
        assert!(matches!(result, Err(EngineError::WorkflowFailed(_))));
    }

    #[tokio::test]
    async fn cancel_workflow_cascades_into_non_terminal_children() {
        let store = MemoryStore::new();
        let parent = start_workflow(&store, "parent", Payload::null(), None).await.unwrap();
        let child = store
            .create_execution(waymark_persistence::NewExecution {
                workflow_name: "child".into(),
                inputs: Payload::null(),
                timeout_at: None,
                parent_id: Some(parent),
                parent_handle: Some(waymark_types::Pos::ZERO),
            })
            .await
            .unwrap();

        cancel_workflow(&store, parent, "because", false).await.unwrap();

        let parent_snapshot = store.snapshot(parent).await.unwrap().unwrap();
        let child_snapshot = store.snapshot(child).await.unwrap().unwrap();
        assert_eq!(parent_snapshot.execution.status, ExecutionStatus::Canceled);
        assert_eq!(child_snapshot.execution.status, ExecutionStatus::Canceled);
    }

    #[tokio::test]
    async fn query_workflow_rejects_an_unregistered_query_name() {
        let store = MemoryStore::new();
        let registry = Registry::new();
        let id = start_workflow(&store, "greeter", Payload::null(), None).await.unwrap();

        let result = query_workflow(&store, &registry, id, "greeter", "missing", Payload::null()).await;
        assert!(matches!(result, Err(EngineError::QueryNotRegistered(_, _))));
    }
}
