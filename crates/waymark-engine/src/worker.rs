use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument, warn};
use waymark_persistence::{ActivityTask, StepCommit, Store, TaskOutcome};
use waymark_types::{ErrorKind, EventType, ExecutionError, ExecutionId, ExecutionStatus, Payload};

use crate::error::EngineError;
use crate::registry::{Registry, SLEEP_ACTIVITY_NAME};
use crate::scheduler;

/// Tunables for [`Worker::run`], one-to-one with the CLI's `worker` subcommand
/// flags (`--tick`, `--batch`, `--iterations`, `--procs`).
///
/// A `Default` impl with sensible production values plus `with_*` setters
/// for CLI overrides.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Upper bound on how long a tick sleeps before the next one.
    pub tick: StdDuration,
    /// Max rows fetched per phase per tick (tasks, then executions).
    pub batch: i64,
    /// Bounds the number of ticks `Worker::run` performs; `None` runs forever.
    pub iterations: Option<u64>,
    /// Max activities dispatched concurrently within a single tick.
    pub procs: usize,
    pub worker_id: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick: StdDuration::from_secs(1),
            batch: 50,
            iterations: None,
            procs: 10,
            worker_id: format!("waymark-worker-{}", std::process::id()),
        }
    }
}

impl WorkerConfig {
    pub fn with_tick(mut self, tick: StdDuration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_batch(mut self, batch: i64) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_iterations(mut self, iterations: u64) -> Self {
        self.iterations = Some(iterations);
        self
    }

    pub fn with_procs(mut self, procs: usize) -> Self {
        self.procs = procs;
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }
}

/// Drives executions and activity tasks to completion against a `Store`.
///
/// A single tick runs strictly in order: sweep execution-level timeouts,
/// reclaim expired activity tasks, dispatch due activities, step runnable
/// executions, then compute how long to sleep before the next tick. Multiple
/// `Worker`s may run concurrently against the same `Store` — row leases
/// (`fetch_runnable`, `fetch_timed_out`, `fetch_expired_tasks`,
/// `lease_due_tasks`) are what keeps them from double-processing the same
/// execution or task.
pub struct Worker<S: Store> {
    store: Arc<S>,
    registry: Arc<Registry>,
    config: WorkerConfig,
}

impl<S: Store + 'static> Worker<S> {
    pub fn new(store: Arc<S>, registry: Arc<Registry>, config: WorkerConfig) -> Self {
        Self { store, registry, config }
    }

    /// Runs ticks until `config.iterations` is exhausted, or forever if unset.
    pub async fn run(&self) -> Result<(), EngineError> {
        let mut remaining = self.config.iterations;
        loop {
            if remaining == Some(0) {
                return Ok(());
            }
            let sleep_for = self.tick().await?;
            if let Some(n) = remaining.as_mut() {
                *n -= 1;
            }
            tokio::time::sleep(sleep_for).await;
        }
    }

    /// Runs exactly one tick and returns how long to sleep before the next.
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn tick(&self) -> Result<StdDuration, EngineError> {
        let now = Utc::now();

        self.sweep_timed_out(now).await?;
        self.reclaim_expired_tasks(now).await?;
        self.run_due_activities(now).await?;
        self.step_runnable(now).await?;

        Ok(self.compute_sleep(now).await?)
    }

    /// Phase 1: executions whose `timeout_at` elapsed become `TIMED_OUT`, and
    /// cascade-cancel any non-terminal children (§4.4, state machine note).
    async fn sweep_timed_out(&self, now: DateTime<Utc>) -> Result<(), EngineError> {
        let timed_out = self.store.fetch_timed_out(now, self.config.batch).await?;
        for execution_id in timed_out {
            info!(%execution_id, "workflow timeout elapsed");
            let mut commit = StepCommit::new(execution_id);
            commit.new_events.push(EventType::WorkflowTimedOut);
            commit.status = Some(ExecutionStatus::TimedOut);
            commit.error = Some(ExecutionError::new(
                ErrorKind::WorkflowTimedOut,
                "execution-level timeout elapsed before completion",
            ));
            self.store.step_commit(commit).await?;
            self.cascade_cancel_children(execution_id, "parent workflow timed out").await?;
        }
        Ok(())
    }

    async fn cascade_cancel_children(&self, parent_id: ExecutionId, reason: &str) -> Result<(), EngineError> {
        for child_id in self.store.list_children(parent_id).await? {
            self.store.cancel_queued_tasks(child_id).await?;
            self.store.cancel_execution(child_id, reason.to_string()).await?;
            Box::pin(self.cascade_cancel_children(child_id, reason)).await?;
        }
        Ok(())
    }

    /// Phase 1b: `RUNNING` `activity_tasks` whose `expires_at` or
    /// `heartbeat_timeout` elapsed without this (or any) worker process
    /// finalizing them — the in-process deadline race in `dispatch_one` only
    /// catches a timeout while the worker that dispatched the task is still
    /// alive; this phase is what reclaims a task orphaned by a crashed or
    /// restarted worker.
    async fn reclaim_expired_tasks(&self, now: DateTime<Utc>) -> Result<(), EngineError> {
        let expired = self.store.fetch_expired_tasks(now, self.config.batch).await?;
        for task in expired {
            warn!(task_id = task.task_id, name = %task.name, "activity task expired");
            let error = ExecutionError::new(
                ErrorKind::ActivityTimedOut,
                format!("activity {:?} exceeded its schedule-to-close or heartbeat deadline", task.name),
            );
            let outcome = match task.retry_policy {
                Some(policy) if policy.should_retry(task.attempt) => {
                    let retry_after = now + Duration::milliseconds((policy.delay_secs(task.attempt) * 1000.0) as i64);
                    TaskOutcome::RetryScheduled { error, retry_after }
                }
                _ => TaskOutcome::TimedOut(error),
            };
            self.store.complete_task(task.task_id, outcome).await?;
        }
        Ok(())
    }

    /// Phase 2: lease up to `batch` due `activity_tasks`, dispatch each in its
    /// own tokio task, and record the outcome. `__sleep__` tasks resolve
    /// without dispatch — the timer's only job was to become due.
    async fn run_due_activities(&self, now: DateTime<Utc>) -> Result<(), EngineError> {
        let tasks = self
            .store
            .lease_due_tasks(now, &self.config.worker_id, self.config.batch)
            .await?;

        let mut joins = Vec::with_capacity(tasks.len());
        for task in tasks {
            let registry = Arc::clone(&self.registry);
            let store = Arc::clone(&self.store);
            joins.push(tokio::spawn(async move {
                let task_id = task.task_id;
                let outcome = dispatch_one(&registry, &task, now).await;
                store.complete_task(task_id, outcome).await
            }));
        }
        for join in joins {
            match join.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => warn!(%error, "failed to record activity task outcome"),
                Err(join_error) => warn!(%join_error, "activity dispatch task panicked"),
            }
        }
        Ok(())
    }

    /// Phase 3: step every non-terminal execution whose `next_wakeup_at` has
    /// elapsed.
    async fn step_runnable(&self, now: DateTime<Utc>) -> Result<(), EngineError> {
        let runnable = self.store.fetch_runnable(now, self.config.batch).await?;
        for execution_id in runnable {
            if let Err(error) = scheduler::step(self.store.as_ref(), &self.registry, execution_id).await {
                warn!(%execution_id, %error, "scheduler step failed");
            }
        }
        Ok(())
    }

    /// Phase 4: sleep until the nearest due time, clamped to `[0, tick]`.
    /// There is no "next due time" query on `Store` beyond re-running
    /// `fetch_runnable`/`lease_due_tasks` previews, so this simply sleeps the
    /// full configured tick — cheap, and bounded by `config.tick` either way.
    async fn compute_sleep(&self, _now: DateTime<Utc>) -> Result<StdDuration, EngineError> {
        Ok(self.config.tick)
    }
}

async fn dispatch_one(registry: &Registry, task: &ActivityTask, now: DateTime<Utc>) -> TaskOutcome {
    if task.name == SLEEP_ACTIVITY_NAME {
        return TaskOutcome::Completed(Payload::null());
    }

    let Some(registration) = registry.lookup_activity(&task.name) else {
        return TaskOutcome::not_registered(&task.name);
    };

    let args = task.args.clone();
    let activity = registration.f;
    let mut handle = tokio::spawn(async move { activity(args).await });

    let outcome = match task.expires_at {
        Some(deadline) => {
            let remaining = (deadline - now).to_std().unwrap_or(StdDuration::ZERO);
            tokio::select! {
                joined = &mut handle => join_outcome(joined),
                _ = tokio::time::sleep(remaining) => {
                    handle.abort();
                    Err(ExecutionError::new(
                        ErrorKind::ActivityTimedOut,
                        format!("activity {:?} exceeded its schedule-to-close deadline", task.name),
                    ))
                }
            }
        }
        None => join_outcome((&mut handle).await),
    };

    match outcome {
        Ok(payload) => TaskOutcome::Completed(payload),
        Err(error) if task.retry_policy.is_some_and(|policy| policy.should_retry(task.attempt)) => {
            let policy = task.retry_policy.expect("checked above");
            let retry_after = now + Duration::milliseconds((policy.delay_secs(task.attempt) * 1000.0) as i64);
            TaskOutcome::RetryScheduled { error, retry_after }
        }
        Err(error) if error.kind == ErrorKind::ActivityTimedOut => TaskOutcome::TimedOut(error),
        Err(error) => TaskOutcome::Failed(error),
    }
}

fn join_outcome(
    joined: Result<Result<Payload, ExecutionError>, tokio::task::JoinError>,
) -> Result<Payload, ExecutionError> {
    match joined {
        Ok(inner) => inner,
        Err(join_error) => Err(ExecutionError::new(
            ErrorKind::Internal,
            format!("activity task panicked: {join_error}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use waymark_persistence::{MemoryStore, NewExecution};
    use waymark_types::Pos;

    use super::*;

    #[tokio::test]
    async fn tick_transitions_an_elapsed_execution_to_timed_out() {
        let store = MemoryStore::new();
        let id = store
            .create_execution(NewExecution {
                workflow_name: "slow".into(),
                inputs: Payload::null(),
                timeout_at: Some(Utc::now() - Duration::seconds(1)),
                parent_id: None,
                parent_handle: None,
            })
            .await
            .unwrap();

        let worker = Worker::new(Arc::new(store), Arc::new(Registry::new()), WorkerConfig::default());
        worker.tick().await.unwrap();

        let snapshot = worker.store.snapshot(id).await.unwrap().unwrap();
        assert_eq!(snapshot.execution.status, ExecutionStatus::TimedOut);
        assert!(snapshot.history.iter().any(|e| matches!(e.kind, EventType::WorkflowTimedOut)));
    }

    #[tokio::test]
    async fn timeout_sweep_cascades_into_non_terminal_children() {
        let store = MemoryStore::new();
        let parent = store
            .create_execution(NewExecution {
                workflow_name: "parent".into(),
                inputs: Payload::null(),
                timeout_at: Some(Utc::now() - Duration::seconds(1)),
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

        let worker = Worker::new(Arc::new(store), Arc::new(Registry::new()), WorkerConfig::default());
        worker.tick().await.unwrap();

        let child_snapshot = worker.store.snapshot(child).await.unwrap().unwrap();
        assert_eq!(child_snapshot.execution.status, ExecutionStatus::Canceled);
    }

    #[tokio::test]
    async fn reclaim_marks_an_orphaned_running_task_timed_out() {
        let store = MemoryStore::new();
        let id = store
            .create_execution(NewExecution {
                workflow_name: "orphans_tasks".into(),
                inputs: Payload::null(),
                timeout_at: None,
                parent_id: None,
                parent_handle: None,
            })
            .await
            .unwrap();
        let mut commit = StepCommit::new(id);
        commit.new_tasks.push(waymark_persistence::NewActivityTask {
            execution_id: id,
            name: "slow_call".to_string(),
            args: Payload::null(),
            scheduled_event_pos: Pos::ZERO.next(),
            after_time: Utc::now() - Duration::seconds(10),
            expires_at: Some(Utc::now() - Duration::seconds(1)),
            heartbeat_timeout: None,
            retry_policy: None,
        });
        store.step_commit(commit).await.unwrap();

        // Simulate a worker having leased the task and then crashing before
        // finishing it: `lease_due_tasks` is what would normally flip it to
        // `RUNNING`.
        store.lease_due_tasks(Utc::now(), "crashed-worker", 10).await.unwrap();

        let worker = Worker::new(Arc::new(store), Arc::new(Registry::new()), WorkerConfig::default());
        worker.tick().await.unwrap();

        let snapshot = worker.store.snapshot(id).await.unwrap().unwrap();
        assert!(snapshot
            .history
            .iter()
            .any(|e| matches!(&e.kind, EventType::ActivityTimedOut { .. })));
    }

    #[tokio::test]
    async fn sleep_tasks_resolve_without_a_registered_activity() {
        let store = MemoryStore::new();
        let id = store
            .create_execution(NewExecution {
                workflow_name: "naps".into(),
                inputs: Payload::null(),
                timeout_at: None,
                parent_id: None,
                parent_handle: None,
            })
            .await
            .unwrap();
        let mut commit = StepCommit::new(id);
        commit.new_tasks.push(waymark_persistence::NewActivityTask {
            execution_id: id,
            name: SLEEP_ACTIVITY_NAME.to_string(),
            args: Payload::null(),
            scheduled_event_pos: Pos::ZERO.next(),
            after_time: Utc::now(),
            expires_at: None,
            heartbeat_timeout: None,
            retry_policy: None,
        });
        store.step_commit(commit).await.unwrap();

        let worker = Worker::new(Arc::new(store), Arc::new(Registry::new()), WorkerConfig::default());
        worker.tick().await.unwrap();

        let snapshot = worker.store.snapshot(id).await.unwrap().unwrap();
        assert!(snapshot.history.iter().any(|e| matches!(e.kind, EventType::TimerFired { .. })));
    }

    #[tokio::test]
    async fn unregistered_activity_fails_the_task_immediately() {
        let store = MemoryStore::new();
        let id = store
            .create_execution(NewExecution {
                workflow_name: "calls_ghost".into(),
                inputs: Payload::null(),
                timeout_at: None,
                parent_id: None,
                parent_handle: None,
            })
            .await
            .unwrap();
        let mut commit = StepCommit::new(id);
        commit.new_tasks.push(waymark_persistence::NewActivityTask {
            execution_id: id,
            name: "ghost_activity".to_string(),
            args: Payload::null(),
            scheduled_event_pos: Pos::ZERO.next(),
            after_time: Utc::now(),
            expires_at: None,
            heartbeat_timeout: None,
            retry_policy: None,
        });
        store.step_commit(commit).await.unwrap();

        let worker = Worker::new(Arc::new(store), Arc::new(Registry::new()), WorkerConfig::default());
        worker.tick().await.unwrap();

        let snapshot = worker.store.snapshot(id).await.unwrap().unwrap();
        assert!(snapshot
            .history
            .iter()
            .any(|e| matches!(&e.kind, EventType::ActivityFailed { error, .. } if error.kind == ErrorKind::NotRegistered)));
    }

    #[test]
    fn worker_config_default_matches_documented_tunables() {
        let config = WorkerConfig::default();
        assert_eq!(config.tick, StdDuration::from_secs(1));
        assert_eq!(config.batch, 50);
        assert_eq!(config.iterations, None);
        assert_eq!(config.procs, 10);
    }

    #[test]
    fn with_iterations_bounds_the_run_loop() {
        let config = WorkerConfig::default().with_iterations(3);
        assert_eq!(config.iterations, Some(3));
    }
}
