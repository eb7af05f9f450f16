use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use waymark_persistence::{NewExecution, StepCommit, Store};
use waymark_types::{EventType, ExecutionId, ExecutionStatus, Pos};

use crate::context::{Context, WorkflowSignal};
use crate::error::EngineError;
use crate::registry::Registry;

/// Runs one scheduler step for `execution_id`.
///
/// Loads the execution's snapshot, replays it against the registered
/// workflow body exactly once, and commits whatever the body produced: a
/// suspend (new events/tasks queued, still running), a terminal completion,
/// or a terminal failure. Every child `ChildScheduled` committed this step
/// also gets its child `Execution` row created immediately after, so the
/// worker can pick it up on its very next tick.
#[instrument(skip(store, registry), fields(execution_id = %execution_id))]
pub async fn step<S: Store + ?Sized>(
    store: &S,
    registry: &Registry,
    execution_id: ExecutionId,
) -> Result<(), EngineError> {
    let snapshot = store
        .snapshot(execution_id)
        .await?
        .ok_or(EngineError::NotFound(execution_id))?;

    if snapshot.execution.status.is_terminal() {
        warn!("skipping step for already-terminal execution");
        return Ok(());
    }

    let workflow_name = snapshot.execution.workflow_name.clone();
    let registration = registry
        .lookup_workflow(&workflow_name)
        .ok_or_else(|| EngineError::WorkflowNotRegistered(workflow_name.clone()))?;

    let now = Utc::now();
    let ctx = Context::new(
        execution_id,
        &snapshot.history,
        snapshot.execution.pending_signals.clone(),
        now,
        Arc::new(registry.clone()),
    );
    let inputs = snapshot.execution.inputs.clone();

    let outcome = (registration.f)(ctx.clone(), inputs).await;
    let effects = ctx.take_effects();

    let starting_pos = snapshot.history.last().map(|e| e.pos.next()).unwrap_or(Pos::ZERO);
    let mut children_to_create = Vec::new();
    for (i, kind) in effects.new_events.iter().enumerate() {
        if let EventType::ChildScheduled { workflow_name, inputs } = kind {
            children_to_create.push((Pos(starting_pos.0 + i as u32), workflow_name.clone(), inputs.clone()));
        }
    }

    let mut commit = StepCommit::new(execution_id);
    commit.new_events = effects.new_events;
    commit.new_tasks = effects.new_tasks;
    commit.consumed_signals = effects.consumed_signals;

    match outcome {
        Ok(result) => {
            info!("workflow completed");
            commit.new_events.push(EventType::WorkflowCompleted { result: result.clone() });
            commit.status = Some(ExecutionStatus::Completed);
            commit.result = Some(result);
        }
        Err(WorkflowSignal::Suspend) => {
            info!(
                new_events = commit.new_events.len(),
                new_tasks = commit.new_tasks.len(),
                "workflow suspended"
            );
            commit.status = Some(ExecutionStatus::Pending);
        }
        Err(WorkflowSignal::Failed(error)) => {
            warn!(%error, "workflow failed");
            commit.new_events.push(EventType::WorkflowFailed { error: error.clone() });
            commit.status = Some(ExecutionStatus::Failed);
            commit.error = Some(error);
        }
    }

    store.step_commit(commit).await?;

    for (parent_handle, child_workflow_name, child_inputs) in children_to_create {
        store
            .create_execution(NewExecution {
                workflow_name: child_workflow_name,
                inputs: child_inputs,
                timeout_at: None,
                parent_id: Some(execution_id),
                parent_handle: Some(parent_handle),
            })
            .await?;
    }

    Ok(())
}
