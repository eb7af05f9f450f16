//! In-memory [`Store`] implementation.
//!
//! Used by `waymark-engine`'s scheduler/worker tests so they can exercise
//! replay and retry logic without a live Postgres instance. Provides the same
//! semantics as [`crate::postgres::PgStore`], just without the durability.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use waymark_types::{EventType, ExecutionId, ExecutionStatus, HistoryEvent, Payload, Pos};

use crate::error::StoreError;
use crate::models::{
    ActivityTask, ActivityTaskStatus, ExecutionRow, ExecutionSnapshot, NewActivityTask, NewExecution,
    PendingSignal, StepCommit, TaskOutcome,
};
use crate::store::Store;

struct ExecutionSlot {
    row: ExecutionRow,
    history: Vec<HistoryEvent>,
}

/// In-memory implementation of [`Store`], backed by a pair of `RwLock`-guarded
/// maps rather than a database connection pool.
///
/// `parking_lot::RwLock` is used instead of `std::sync::RwLock` or
/// `tokio::sync::RwLock`: every critical section here is synchronous (no
/// `.await` while held), so the non-poisoning, uncontended-fast-path lock is
/// the better fit.
pub struct MemoryStore {
    executions: RwLock<HashMap<ExecutionId, ExecutionSlot>>,
    tasks: RwLock<HashMap<i64, ActivityTask>>,
    next_task_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
            next_task_id: AtomicI64::new(1),
        }
    }

    /// Current status of an execution, for test assertions.
    pub fn status_of(&self, id: ExecutionId) -> Option<ExecutionStatus> {
        self.executions.read().get(&id).map(|s| s.row.status)
    }

    /// Full journal of an execution, for test assertions.
    pub fn history_of(&self, id: ExecutionId) -> Option<Vec<HistoryEvent>> {
        self.executions.read().get(&id).map(|s| s.history.clone())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_execution(&self, input: NewExecution) -> Result<ExecutionId, StoreError> {
        let now = Utc::now();
        let id = ExecutionId::new();
        let started = HistoryEvent {
            pos: Pos::ZERO,
            created_at: now,
            kind: EventType::WorkflowStarted {
                inputs: input.inputs.clone(),
            },
        };
        let row = ExecutionRow {
            id,
            workflow_name: input.workflow_name,
            inputs: input.inputs,
            status: ExecutionStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            started_at: Some(now),
            finished_at: None,
            timeout_at: input.timeout_at,
            parent_id: input.parent_id,
            parent_handle: input.parent_handle,
            next_wakeup_at: Some(now),
            pending_signals: Vec::new(),
        };
        self.executions.write().insert(
            id,
            ExecutionSlot {
                row,
                history: vec![started],
            },
        );
        Ok(id)
    }

    async fn snapshot(&self, id: ExecutionId) -> Result<Option<ExecutionSnapshot>, StoreError> {
        let executions = self.executions.read();
        Ok(executions.get(&id).map(|slot| ExecutionSnapshot {
            execution: slot.row.clone(),
            history: slot.history.clone(),
        }))
    }

    async fn fetch_runnable(
        &self,
        now: chrono::DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExecutionId>, StoreError> {
        let mut executions = self.executions.write();
        let mut due: Vec<ExecutionId> = executions
            .iter()
            .filter(|(_, slot)| {
                !slot.row.status.is_terminal()
                    && slot.row.next_wakeup_at.is_some_and(|wake| wake <= now)
            })
            .map(|(id, _)| *id)
            .collect();
        due.sort_by_key(|id| executions[id].row.next_wakeup_at);
        due.truncate(limit.max(0) as usize);

        // Leased: clear next_wakeup_at so a concurrent/overlapping tick
        // doesn't hand the same execution to a second stepper before
        // step_commit sets a fresh wakeup time.
        for id in &due {
            if let Some(slot) = executions.get_mut(id) {
                slot.row.next_wakeup_at = None;
            }
        }
        Ok(due)
    }

    async fn fetch_timed_out(
        &self,
        now: chrono::DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExecutionId>, StoreError> {
        let mut executions = self.executions.write();
        let mut due: Vec<ExecutionId> = executions
            .iter()
            .filter(|(_, slot)| {
                !slot.row.status.is_terminal() && slot.row.timeout_at.is_some_and(|deadline| deadline <= now)
            })
            .map(|(id, _)| *id)
            .collect();
        due.sort_by_key(|id| executions[id].row.timeout_at);
        due.truncate(limit.max(0) as usize);

        for id in &due {
            if let Some(slot) = executions.get_mut(id) {
                slot.row.next_wakeup_at = None;
            }
        }
        Ok(due)
    }

    async fn lease_due_tasks(
        &self,
        now: chrono::DateTime<Utc>,
        worker_id: &str,
        limit: i64,
    ) -> Result<Vec<ActivityTask>, StoreError> {
        let mut tasks = self.tasks.write();
        let mut due: Vec<i64> = tasks
            .iter()
            .filter(|(_, t)| t.status == ActivityTaskStatus::Queued && t.after_time <= now)
            .map(|(id, _)| *id)
            .collect();
        due.sort_by_key(|id| tasks[id].after_time);
        due.truncate(limit.max(0) as usize);

        let mut leased = Vec::with_capacity(due.len());
        for id in due {
            if let Some(task) = tasks.get_mut(&id) {
                task.status = ActivityTaskStatus::Running;
                task.locked_by = Some(worker_id.to_string());
                leased.push(task.clone());
            }
        }
        Ok(leased)
    }

    async fn fetch_expired_tasks(&self, now: chrono::DateTime<Utc>, limit: i64) -> Result<Vec<ActivityTask>, StoreError> {
        let mut tasks = self.tasks.write();
        let mut due: Vec<i64> = tasks
            .iter()
            .filter(|(_, t)| {
                t.status == ActivityTaskStatus::Running
                    && (t.expires_at.is_some_and(|deadline| deadline <= now)
                        || t.heartbeat_timeout.is_some_and(|deadline| deadline <= now))
            })
            .map(|(id, _)| *id)
            .collect();
        due.sort_unstable();
        due.truncate(limit.max(0) as usize);

        let mut expired = Vec::with_capacity(due.len());
        for id in due {
            if let Some(task) = tasks.get_mut(&id) {
                task.status = ActivityTaskStatus::TimedOut;
                expired.push(task.clone());
            }
        }
        Ok(expired)
    }

    async fn complete_task(&self, task_id: i64, outcome: TaskOutcome) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(&task_id).ok_or(StoreError::TaskNotFound(task_id))?;

        match outcome {
            TaskOutcome::RetryScheduled { retry_after, .. } => {
                task.status = ActivityTaskStatus::Queued;
                task.attempt += 1;
                task.after_time = retry_after;
                return Ok(());
            }
            TaskOutcome::Completed(result) => {
                task.status = ActivityTaskStatus::Completed;
                let scheduled_pos = task.scheduled_event_pos;
                let execution_id = task.execution_id;
                let is_timer = task.name == waymark_types::SLEEP_ACTIVITY_NAME;
                drop(tasks);
                let kind = if is_timer {
                    EventType::TimerFired { scheduled_pos }
                } else {
                    EventType::ActivityCompleted { scheduled_pos, result }
                };
                self.append_terminal(execution_id, kind, now)?;
            }
            TaskOutcome::Failed(error) => {
                task.status = ActivityTaskStatus::Failed;
                let scheduled_pos = task.scheduled_event_pos;
                let execution_id = task.execution_id;
                drop(tasks);
                self.append_terminal(
                    execution_id,
                    EventType::ActivityFailed { scheduled_pos, error },
                    now,
                )?;
            }
            TaskOutcome::TimedOut(error) => {
                task.status = ActivityTaskStatus::TimedOut;
                let scheduled_pos = task.scheduled_event_pos;
                let execution_id = task.execution_id;
                drop(tasks);
                self.append_terminal(
                    execution_id,
                    EventType::ActivityTimedOut { scheduled_pos, error },
                    now,
                )?;
            }
        }
        Ok(())
    }

    async fn step_commit(&self, commit: StepCommit) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut executions = self.executions.write();
        let slot = executions
            .get_mut(&commit.execution_id)
            .ok_or(StoreError::NotFound(commit.execution_id))?;

        for kind in commit.new_events {
            let pos = slot.history.last().map(|e| e.pos.next()).unwrap_or(Pos::ZERO);
            slot.history.push(HistoryEvent {
                pos,
                created_at: now,
                kind,
            });
        }

        for name in &commit.consumed_signals {
            if let Some(idx) = slot.row.pending_signals.iter().position(|p| &p.name == name) {
                slot.row.pending_signals.remove(idx);
            }
        }

        if let Some(status) = commit.status {
            slot.row.status = status;
            if status.is_terminal() {
                slot.row.finished_at = Some(now);
                slot.row.next_wakeup_at = None;
            }
        }
        if commit.result.is_some() {
            slot.row.result = commit.result;
        }
        if commit.error.is_some() {
            slot.row.error = commit.error.clone();
        }
        if commit.next_wakeup_at.is_some() {
            slot.row.next_wakeup_at = commit.next_wakeup_at;
        }

        let parent_link = if commit.status.is_some_and(|s| s.is_terminal()) {
            slot.row.parent_id.zip(slot.row.parent_handle).map(|(parent_id, handle)| {
                (parent_id, handle, slot.row.status, slot.row.result.clone(), slot.row.error.clone())
            })
        } else {
            None
        };
        drop(executions);

        for new_task in commit.new_tasks {
            self.insert_task(new_task);
        }

        if let Some((parent_id, handle, status, result, error)) = parent_link {
            self.propagate_child_result(parent_id, handle, status, result, error, now)?;
        }

        Ok(())
    }

    async fn signal_execution(&self, id: ExecutionId, name: String, payload: Payload) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut executions = self.executions.write();
        let slot = executions.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if slot.row.status.is_terminal() {
            return Ok(());
        }

        let wait_pos = waymark_journal::resolution::pending_signal_wait(&slot.history, &name);
        match wait_pos {
            Some(wait_pos) => {
                let pos = slot.history.last().map(|e| e.pos.next()).unwrap_or(Pos::ZERO);
                slot.history.push(HistoryEvent {
                    pos,
                    created_at: now,
                    kind: EventType::SignalReceived { wait_pos, name, payload },
                });
                slot.row.next_wakeup_at = Some(now);
            }
            None => {
                slot.row.pending_signals.push(PendingSignal {
                    name,
                    payload,
                    received_at: now,
                });
            }
        }
        Ok(())
    }

    async fn cancel_execution(&self, id: ExecutionId, reason: String) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut executions = self.executions.write();
        let slot = executions.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if slot.row.status.is_terminal() {
            return Ok(());
        }
        let pos = slot.history.last().map(|e| e.pos.next()).unwrap_or(Pos::ZERO);
        slot.history.push(HistoryEvent {
            pos,
            created_at: now,
            kind: EventType::WorkflowCanceled { reason },
        });
        slot.row.status = ExecutionStatus::Canceled;
        slot.row.finished_at = Some(now);
        slot.row.next_wakeup_at = None;
        Ok(())
    }

    async fn cancel_queued_tasks(&self, id: ExecutionId) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write();
        for task in tasks.values_mut() {
            if task.execution_id == id && task.status == ActivityTaskStatus::Queued {
                task.status = ActivityTaskStatus::Canceled;
            }
        }
        Ok(())
    }

    async fn list_children(&self, id: ExecutionId) -> Result<Vec<ExecutionId>, StoreError> {
        let executions = self.executions.read();
        Ok(executions
            .iter()
            .filter(|(_, slot)| slot.row.parent_id == Some(id))
            .map(|(child_id, _)| *child_id)
            .collect())
    }
}

impl MemoryStore {
    fn append_terminal(
        &self,
        execution_id: ExecutionId,
        kind: EventType,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut executions = self.executions.write();
        let slot = executions.get_mut(&execution_id).ok_or(StoreError::NotFound(execution_id))?;
        let pos = slot.history.last().map(|e| e.pos.next()).unwrap_or(Pos::ZERO);
        slot.history.push(HistoryEvent { pos, created_at: now, kind });
        slot.row.next_wakeup_at = Some(now);
        Ok(())
    }

    fn insert_task(&self, new_task: NewActivityTask) {
        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        self.tasks.write().insert(
            task_id,
            ActivityTask {
                task_id,
                execution_id: new_task.execution_id,
                name: new_task.name,
                args: new_task.args,
                status: ActivityTaskStatus::Queued,
                attempt: 1,
                after_time: new_task.after_time,
                expires_at: new_task.expires_at,
                heartbeat_timeout: new_task.heartbeat_timeout,
                last_heartbeat_at: None,
                retry_policy: new_task.retry_policy,
                scheduled_event_pos: new_task.scheduled_event_pos,
                locked_by: None,
                locked_until: None,
            },
        );
    }

    /// Appends `ChildCompleted`/`ChildFailed` to `parent_id`'s journal and
    /// wakes it, once a child execution with a `parent_handle` reaches a
    /// terminal status. Runs after the child's own transaction has released
    /// its lock on `executions`, taking a second lock on the parent's slot.
    fn propagate_child_result(
        &self,
        parent_id: ExecutionId,
        handle: Pos,
        child_status: ExecutionStatus,
        result: Option<Payload>,
        error: Option<waymark_types::ExecutionError>,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let kind = match child_status {
            ExecutionStatus::Completed => EventType::ChildCompleted {
                scheduled_pos: handle,
                result: result.unwrap_or_default(),
            },
            _ => EventType::ChildFailed {
                scheduled_pos: handle,
                error: error.unwrap_or_else(|| {
                    waymark_types::ExecutionError::new(waymark_types::ErrorKind::Internal, "child failed with no error detail")
                }),
            },
        };
        self.append_terminal(parent_id, kind, now)
    }
}

#[cfg(test)]
mod tests {
    use waymark_types::Payload;

    use super::*;

    #[tokio::test]
    async fn create_execution_records_workflow_started_and_is_runnable() {
        let store = MemoryStore::new();
        let id = store
            .create_execution(NewExecution {
                workflow_name: "order_flow".into(),
                inputs: Payload::null(),
                timeout_at: None,
                parent_id: None,
                parent_handle: None,
            })
            .await
            .unwrap();

        let snapshot = store.snapshot(id).await.unwrap().unwrap();
        assert_eq!(snapshot.history.len(), 1);
        assert!(matches!(snapshot.history[0].kind, EventType::WorkflowStarted { .. }));
        assert_eq!(snapshot.execution.status, ExecutionStatus::Pending);

        let due = store.fetch_runnable(Utc::now(), 10).await.unwrap();
        assert_eq!(due, vec![id]);
        // Leased: a second fetch before step_commit sees nothing.
        let due_again = store.fetch_runnable(Utc::now(), 10).await.unwrap();
        assert!(due_again.is_empty());
    }

    #[tokio::test]
    async fn signal_before_wait_is_buffered_then_consumed() {
        let store = MemoryStore::new();
        let id = store
            .create_execution(NewExecution {
                workflow_name: "waits_for_go".into(),
                inputs: Payload::null(),
                timeout_at: None,
                parent_id: None,
                parent_handle: None,
            })
            .await
            .unwrap();

        store
            .signal_execution(id, "go".into(), Payload::encode(&1).unwrap())
            .await
            .unwrap();
        let snapshot = store.snapshot(id).await.unwrap().unwrap();
        assert_eq!(snapshot.execution.pending_signals.len(), 1);
        assert_eq!(snapshot.history.len(), 1, "buffered signal is not a history event yet");
    }

    #[tokio::test]
    async fn fetch_timed_out_leases_only_elapsed_non_terminal_executions() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let soon_to_expire = store
            .create_execution(NewExecution {
                workflow_name: "will_time_out".into(),
                inputs: Payload::null(),
                timeout_at: Some(now - chrono::Duration::seconds(1)),
                parent_id: None,
                parent_handle: None,
            })
            .await
            .unwrap();
        let still_fresh = store
            .create_execution(NewExecution {
                workflow_name: "still_fresh".into(),
                inputs: Payload::null(),
                timeout_at: Some(now + chrono::Duration::hours(1)),
                parent_id: None,
                parent_handle: None,
            })
            .await
            .unwrap();
        let no_deadline = store
            .create_execution(NewExecution {
                workflow_name: "no_deadline".into(),
                inputs: Payload::null(),
                timeout_at: None,
                parent_id: None,
                parent_handle: None,
            })
            .await
            .unwrap();

        let due = store.fetch_timed_out(now, 10).await.unwrap();
        assert_eq!(due, vec![soon_to_expire]);
        assert!(!due.contains(&still_fresh));
        assert!(!due.contains(&no_deadline));

        // Leased: a second sweep before any commit sees nothing.
        assert!(store.fetch_timed_out(now, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_queued_tasks_only_touches_queued_rows() {
        let store = MemoryStore::new();
        let id = store
            .create_execution(NewExecution {
                workflow_name: "fan_out".into(),
                inputs: Payload::null(),
                timeout_at: None,
                parent_id: None,
                parent_handle: None,
            })
            .await
            .unwrap();

        let now = Utc::now();
        let mut commit = StepCommit::new(id);
        commit.new_tasks.push(NewActivityTask {
            execution_id: id,
            name: "send_email".into(),
            args: Payload::null(),
            scheduled_event_pos: Pos::ZERO.next(),
            after_time: now,
            expires_at: None,
            heartbeat_timeout: None,
            retry_policy: None,
        });
        store.step_commit(commit).await.unwrap();

        let leased = store.lease_due_tasks(now, "worker-1", 10).await.unwrap();
        assert_eq!(leased.len(), 1, "task is now RUNNING, not QUEUED");

        // A second queued task, never leased, stays cancelable.
        let mut commit = StepCommit::new(id);
        commit.new_tasks.push(NewActivityTask {
            execution_id: id,
            name: "send_sms".into(),
            args: Payload::null(),
            scheduled_event_pos: Pos::ZERO.next().next(),
            after_time: now,
            expires_at: None,
            heartbeat_timeout: None,
            retry_policy: None,
        });
        store.step_commit(commit).await.unwrap();

        store.cancel_queued_tasks(id).await.unwrap();

        // The still-QUEUED task is gone from future leases; the RUNNING one
        // was never touched and isn't re-leasable either way.
        let leased_again = store.lease_due_tasks(now, "worker-1", 10).await.unwrap();
        assert!(leased_again.is_empty());
    }

    #[tokio::test]
    async fn list_children_returns_only_direct_children() {
        let store = MemoryStore::new();
        let parent = store
            .create_execution(NewExecution {
                workflow_name: "parent".into(),
                inputs: Payload::null(),
                timeout_at: None,
                parent_id: None,
                parent_handle: None,
            })
            .await
            .unwrap();
        let child = store
            .create_execution(NewExecution {
                workflow_name: "child".into(),
                inputs: Payload::null(),
                timeout_at: None,
                parent_id: Some(parent),
                parent_handle: Some(Pos::ZERO),
            })
            .await
            .unwrap();
        let grandchild = store
            .create_execution(NewExecution {
                workflow_name: "grandchild".into(),
                inputs: Payload::null(),
                timeout_at: None,
                parent_id: Some(child),
                parent_handle: Some(Pos::ZERO),
            })
            .await
            .unwrap();

        let children = store.list_children(parent).await.unwrap();
        assert_eq!(children, vec![child]);
        assert!(!children.contains(&grandchild));
    }
}
