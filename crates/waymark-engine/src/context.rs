use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use waymark_journal::{InvokeOutcome, ReplayCache};
use waymark_persistence::{NewActivityTask, PendingSignal};
use waymark_types::{ActivityHandle, EventType, ExecutionError, ExecutionId, HistoryEvent, Payload, Pos, RetryPolicy};

use crate::registry::{Registry, SLEEP_ACTIVITY_NAME};

/// The Rust realization of "raise NEEDS_PAUSE, unwind the body": every
/// [`Context`] operation returns `Step<T>`, and `Suspend` propagated through
/// `?` unwinds the workflow body exactly once, running no further user code.
/// `Failed` does the same for an execution-terminating error (nondeterminism,
/// a propagated activity failure the body chose not to catch, etc).
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowSignal {
    Suspend,
    Failed(ExecutionError),
}

pub type Step<T> = Result<T, WorkflowSignal>;

impl From<ExecutionError> for WorkflowSignal {
    fn from(error: ExecutionError) -> Self {
        WorkflowSignal::Failed(error)
    }
}

/// One scheduler step's accumulated side effects, read back by
/// [`crate::scheduler::step`] once the workflow body's future resolves.
#[derive(Default, Debug)]
pub struct StepEffects {
    pub new_events: Vec<EventType>,
    pub new_tasks: Vec<NewActivityTask>,
    pub consumed_signals: Vec<String>,
}

struct ContextState {
    body_positions: Vec<HistoryEvent>,
    body_cursor: usize,
    cache: ReplayCache,
    pending_signals: Vec<PendingSignal>,
    next_pos: Pos,
    effects: StepEffects,
}

fn is_body_emitted(kind: &EventType) -> bool {
    matches!(
        kind,
        EventType::ActivityScheduled { .. }
            | EventType::TimerScheduled { .. }
            | EventType::ChildScheduled { .. }
            | EventType::SignalWait { .. }
            | EventType::VersionMarker { .. }
            | EventType::PatchMarker { .. }
    )
}

/// The per-invocation replay core handed to a workflow body.
///
/// Cheaply `Clone`: it is an `Arc<Mutex<..>>` handle so the scheduler can keep
/// its own handle to read back [`StepEffects`] after handing ownership of a
/// `Context` into the boxed workflow future (`WorkflowFn` takes `Context` by
/// value, matching an imperative `async fn(ctx, input)` workflow signature).
///
/// Every operation consults `history` (what already happened) before
/// appending anything new, via two cursors:
/// - `body_cursor` walks the subsequence of `history` that the workflow body
///   itself produces (`ActivityScheduled`, `TimerScheduled`, `ChildScheduled`,
///   `SignalWait`, `VersionMarker`, `PatchMarker`) — exactly the events a
///   deterministic replay of this body would emit again, in the same order.
/// - `cache` (built once over the *entire* snapshot) answers "has this
///   already resolved?" for any position, regardless of which step appended
///   the resolving event — those are written by the worker/persistence layer
///   out of band, never by the body itself, so they are never cursor-tracked.
#[derive(Clone)]
pub struct Context {
    execution_id: ExecutionId,
    now: DateTime<Utc>,
    registry: Arc<Registry>,
    state: Arc<Mutex<ContextState>>,
}

impl Context {
    pub fn new(
        execution_id: ExecutionId,
        history: &[HistoryEvent],
        pending_signals: Vec<PendingSignal>,
        now: DateTime<Utc>,
        registry: Arc<Registry>,
    ) -> Self {
        let body_positions: Vec<HistoryEvent> =
            history.iter().filter(|e| is_body_emitted(&e.kind)).cloned().collect();
        let next_pos = history.last().map(|e| e.pos.next()).unwrap_or(Pos::ZERO);
        Self {
            execution_id,
            now,
            registry,
            state: Arc::new(Mutex::new(ContextState {
                body_positions,
                body_cursor: 0,
                cache: ReplayCache::build(history),
                pending_signals,
                next_pos,
                effects: StepEffects::default(),
            })),
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Takes the accumulated effects out, leaving an empty set behind. Called
    /// by the scheduler after the workflow body's future has resolved; any
    /// further call on a `Context` clone after this point is a programming
    /// error (the step is over), not a case this API tries to make safe.
    pub fn take_effects(&self) -> StepEffects {
        std::mem::take(&mut self.state.lock().effects)
    }

    /// Returns the `pos` assigned to this call plus whether it was freshly
    /// recorded (`true`) or replayed from `history` (`false`). `matches`
    /// decides whether a replayed entry is the one this call expects.
    fn schedule<F>(&self, build: F, matches: impl Fn(&EventType) -> bool, what: &str) -> Step<(Pos, bool)>
    where
        F: FnOnce() -> EventType,
    {
        let mut state = self.state.lock();
        if state.body_cursor < state.body_positions.len() {
            let entry = &state.body_positions[state.body_cursor];
            if !matches(&entry.kind) {
                return Err(WorkflowSignal::Failed(ExecutionError::nondeterminism(format!(
                    "expected {what} at pos {}, recorded history has {}",
                    entry.pos,
                    entry.kind.name()
                ))));
            }
            let pos = entry.pos;
            state.body_cursor += 1;
            Ok((pos, false))
        } else {
            let pos = state.next_pos;
            state.next_pos = state.next_pos.next();
            state.effects.new_events.push(build());
            Ok((pos, true))
        }
    }

    /// `run_activity`: schedule and block until resolved, in one call.
    pub async fn run_activity(
        &self,
        name: impl Into<String>,
        args: Payload,
        retry_policy: Option<RetryPolicy>,
    ) -> Step<Payload> {
        let handle = self.start_activity(name, args, retry_policy)?;
        self.wait_activity(handle)
    }

    /// `start_activity`: schedule without blocking, returning a stable handle.
    ///
    /// `expires_at`/`heartbeat_timeout` come from the activity's registration
    /// (`Registry::register_activity`), not from the call site: there is no
    /// per-call override for either. `retry_policy` falls back to the
    /// registered default when the caller passes `None`.
    pub fn start_activity(
        &self,
        name: impl Into<String>,
        args: Payload,
        retry_policy: Option<RetryPolicy>,
    ) -> Step<ActivityHandle> {
        let name = name.into();
        let registration = self.registry.lookup_activity(&name);
        let retry_policy = retry_policy.or(registration.as_ref().and_then(|r| r.retry_policy));
        let (pos, is_new) = self.schedule(
            || EventType::ActivityScheduled {
                name: name.clone(),
                args: args.clone(),
                retry_policy,
            },
            |kind| matches!(kind, EventType::ActivityScheduled { .. }),
            "ACTIVITY_SCHEDULED",
        )?;
        if is_new {
            let expires_at = registration
                .as_ref()
                .and_then(|r| r.timeout)
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .map(|d| self.now + d);
            let heartbeat_timeout = registration
                .as_ref()
                .and_then(|r| r.heartbeat_timeout)
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .map(|d| self.now + d);
            self.state.lock().effects.new_tasks.push(NewActivityTask {
                execution_id: self.execution_id,
                name,
                args,
                scheduled_event_pos: pos,
                after_time: self.now,
                expires_at,
                heartbeat_timeout,
                retry_policy,
            });
        }
        Ok(pos)
    }

    /// `wait_activity`: a pure cache read — never appends anything, since the
    /// resolving event is written by the worker, not the body.
    pub fn wait_activity(&self, handle: ActivityHandle) -> Step<Payload> {
        match self.state.lock().cache.activity_outcome(handle) {
            Some(InvokeOutcome::Completed(payload)) => Ok(payload.clone()),
            Some(InvokeOutcome::Failed(error) | InvokeOutcome::TimedOut(error)) => {
                Err(WorkflowSignal::Failed(error.clone()))
            }
            None => Err(WorkflowSignal::Suspend),
        }
    }

    /// Durable sleep, implemented as scheduling against the reserved
    /// `__sleep__` activity rather than a distinct code path.
    ///
    /// `expires_at` is the timer's own `fire_at`: a sleep has no separate
    /// schedule-to-close deadline, it simply resolves once `fire_at` passes,
    /// so the worker's deadline race fires exactly at due time instead of
    /// running unbounded.
    pub fn sleep(&self, seconds: f64) -> Step<()> {
        let fire_at = self.now + chrono::Duration::milliseconds((seconds * 1000.0) as i64);
        let (pos, is_new) = self.schedule(
            || EventType::TimerScheduled { fire_at },
            |kind| matches!(kind, EventType::TimerScheduled { .. }),
            "TIMER_SCHEDULED",
        )?;
        if is_new {
            self.state.lock().effects.new_tasks.push(NewActivityTask {
                execution_id: self.execution_id,
                name: SLEEP_ACTIVITY_NAME.to_string(),
                args: Payload::null(),
                scheduled_event_pos: pos,
                after_time: fire_at,
                expires_at: Some(fire_at),
                heartbeat_timeout: None,
                retry_policy: None,
            });
        }
        if self.state.lock().cache.is_timer_fired(pos) {
            Ok(())
        } else {
            Err(WorkflowSignal::Suspend)
        }
    }

    /// Waits for a named signal. A delivery buffered before this call ever
    /// ran (`pending_signals`) resolves it immediately, in the same step.
    pub fn wait_signal(&self, name: impl Into<String>) -> Step<Payload> {
        let name = name.into();
        let name_for_build = name.clone();
        let name_for_match = name.clone();
        let (pos, is_new) = self.schedule(
            || EventType::SignalWait { name: name_for_build },
            |kind| matches!(kind, EventType::SignalWait { name: n } if n == &name_for_match),
            "SIGNAL_WAIT",
        )?;

        if let Some(payload) = self.state.lock().cache.signal_payload(pos) {
            return Ok(payload.clone());
        }

        if is_new {
            let mut state = self.state.lock();
            if let Some(idx) = state.pending_signals.iter().position(|p| p.name == name) {
                let delivery = state.pending_signals.remove(idx);
                state.effects.new_events.push(EventType::SignalReceived {
                    wait_pos: pos,
                    name: name.clone(),
                    payload: delivery.payload.clone(),
                });
                state.effects.consumed_signals.push(name);
                return Ok(delivery.payload);
            }
        }

        Err(WorkflowSignal::Suspend)
    }

    /// `run_workflow`: start and block on a child execution, in one call.
    pub async fn run_workflow(&self, workflow_name: impl Into<String>, inputs: Payload) -> Step<Payload> {
        let handle = self.start_workflow(workflow_name, inputs)?;
        self.wait_workflow(handle)
    }

    /// `start_workflow`: schedules a child without blocking. The actual child
    /// `Execution` row is created by the scheduler once it sees this event
    /// committed (see `crate::scheduler`), not by the `Context` itself.
    pub fn start_workflow(&self, workflow_name: impl Into<String>, inputs: Payload) -> Step<ActivityHandle> {
        let workflow_name = workflow_name.into();
        let (pos, _is_new) = self.schedule(
            || EventType::ChildScheduled {
                workflow_name: workflow_name.clone(),
                inputs: inputs.clone(),
            },
            |kind| matches!(kind, EventType::ChildScheduled { .. }),
            "CHILD_SCHEDULED",
        )?;
        Ok(pos)
    }

    pub fn wait_workflow(&self, handle: ActivityHandle) -> Step<Payload> {
        match self.state.lock().cache.child_outcome(handle) {
            Some(InvokeOutcome::Completed(payload)) => Ok(payload.clone()),
            Some(InvokeOutcome::Failed(error) | InvokeOutcome::TimedOut(error)) => {
                Err(WorkflowSignal::Failed(error.clone()))
            }
            None => Err(WorkflowSignal::Suspend),
        }
    }

    /// First call for a given `change_id` pins `max_supported` as this
    /// execution's version forever after; every later replay trusts the
    /// recorded value instead of re-evaluating `max_supported`.
    pub fn get_version(&self, change_id: impl Into<String>, _min_supported: i32, max_supported: i32) -> Step<i32> {
        let change_id = change_id.into();
        let change_id_for_build = change_id.clone();
        let change_id_for_match = change_id.clone();
        let (pos, is_new) = self.schedule(
            || EventType::VersionMarker {
                change_id: change_id_for_build,
                version: max_supported,
            },
            |kind| matches!(kind, EventType::VersionMarker { change_id: c, .. } if c == &change_id_for_match),
            "VERSION_MARKER",
        )?;
        if is_new {
            return Ok(max_supported);
        }
        self.state.lock().cache.version(&change_id).ok_or_else(|| {
            WorkflowSignal::Failed(ExecutionError::nondeterminism(format!(
                "VERSION_MARKER at pos {pos} missing from replay cache"
            )))
        })
    }

    /// First call for a given `change_id` records that the new code path is
    /// live; every later replay trusts the recorded bool.
    pub fn patched(&self, change_id: impl Into<String>) -> Step<bool> {
        let change_id = change_id.into();
        let change_id_for_build = change_id.clone();
        let change_id_for_match = change_id.clone();
        let (pos, is_new) = self.schedule(
            || EventType::PatchMarker {
                change_id: change_id_for_build,
                patched: true,
            },
            |kind| matches!(kind, EventType::PatchMarker { change_id: c, .. } if c == &change_id_for_match),
            "PATCH_MARKER",
        )?;
        if is_new {
            return Ok(true);
        }
        self.state.lock().cache.patched(&change_id).ok_or_else(|| {
            WorkflowSignal::Failed(ExecutionError::nondeterminism(format!(
                "PATCH_MARKER at pos {pos} missing from replay cache"
            )))
        })
    }

    /// Marks a previously-`patched` change as fully rolled out: the old code
    /// path is gone, so no branch is left to pin — just a marker for
    /// determinism bookkeeping on executions still replaying through it.
    pub fn deprecate_patch(&self, change_id: impl Into<String>) -> Step<()> {
        let change_id = change_id.into();
        let change_id_for_build = change_id.clone();
        let change_id_for_match = change_id.clone();
        self.schedule(
            || EventType::PatchMarker {
                change_id: change_id_for_build,
                patched: false,
            },
            |kind| matches!(kind, EventType::PatchMarker { change_id: c, .. } if c == &change_id_for_match),
            "PATCH_MARKER",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use waymark_types::Pos;

    use super::*;

    fn history(entries: Vec<(u32, EventType)>) -> Vec<HistoryEvent> {
        entries
            .into_iter()
            .map(|(pos, kind)| HistoryEvent {
                pos: Pos(pos),
                created_at: Utc::now(),
                kind,
            })
            .collect()
    }

    #[tokio::test]
    async fn fresh_activity_schedule_suspends_and_enqueues_a_task() {
        let ctx = Context::new(ExecutionId::new(), &[], Vec::new(), Utc::now(), Arc::new(Registry::new()));
        let result = ctx.run_activity("add", Payload::null(), None).await;
        assert_eq!(result, Err(WorkflowSignal::Suspend));
        let effects = ctx.take_effects();
        assert_eq!(effects.new_events.len(), 1);
        assert_eq!(effects.new_tasks.len(), 1);
        assert_eq!(effects.new_tasks[0].name, "add");
    }

    #[tokio::test]
    async fn replaying_resolved_activity_returns_cached_result() {
        let entries = history(vec![
            (0, EventType::WorkflowStarted { inputs: Payload::null() }),
            (1, EventType::ActivityScheduled {
                name: "add".into(),
                args: Payload::null(),
                retry_policy: None,
            }),
            (2, EventType::ActivityCompleted {
                scheduled_pos: 1.into(),
                result: Payload::encode(&3).unwrap(),
            }),
        ]);
        let ctx = Context::new(ExecutionId::new(), &entries, Vec::new(), Utc::now(), Arc::new(Registry::new()));
        let result = ctx.run_activity("add", Payload::null(), None).await;
        assert_eq!(result.unwrap().decode::<i32>().unwrap(), 3);
        assert!(ctx.take_effects().new_events.is_empty());
    }

    #[tokio::test]
    async fn mismatched_replay_kind_is_nondeterminism() {
        let entries = history(vec![
            (0, EventType::WorkflowStarted { inputs: Payload::null() }),
            (1, EventType::TimerScheduled { fire_at: Utc::now() }),
        ]);
        let ctx = Context::new(ExecutionId::new(), &entries, Vec::new(), Utc::now(), Arc::new(Registry::new()));
        let result = ctx.run_activity("add", Payload::null(), None).await;
        assert!(matches!(
            result,
            Err(WorkflowSignal::Failed(e)) if e.kind == waymark_types::ErrorKind::Nondeterminism
        ));
    }

    #[test]
    fn wait_signal_resolves_immediately_from_a_buffered_delivery() {
        let pending = vec![PendingSignal {
            name: "go".into(),
            payload: Payload::encode(&"hi").unwrap(),
            received_at: Utc::now(),
        }];
        let ctx = Context::new(ExecutionId::new(), &[], pending, Utc::now(), Arc::new(Registry::new()));
        let result = ctx.wait_signal("go");
        assert_eq!(result.unwrap().decode::<String>().unwrap(), "hi");
        let effects = ctx.take_effects();
        assert_eq!(effects.consumed_signals, vec!["go".to_string()]);
        assert_eq!(effects.new_events.len(), 2, "both SIGNAL_WAIT and SIGNAL_RECEIVED committed together");
    }

    #[test]
    fn get_version_pins_max_supported_on_first_call() {
        let ctx = Context::new(ExecutionId::new(), &[], Vec::new(), Utc::now(), Arc::new(Registry::new()));
        let version = ctx.get_version("add-retries", 1, 3).unwrap();
        assert_eq!(version, 3);
    }

    #[test]
    fn get_version_replay_trusts_recorded_value_over_current_max() {
        let entries = history(vec![
            (0, EventType::WorkflowStarted { inputs: Payload::null() }),
            (1, EventType::VersionMarker {
                change_id: "add-retries".into(),
                version: 1,
            }),
        ]);
        let ctx = Context::new(ExecutionId::new(), &entries, Vec::new(), Utc::now(), Arc::new(Registry::new()));
        // Code has moved on to max_supported=5, but this execution pins 1.
        let version = ctx.get_version("add-retries", 1, 5).unwrap();
        assert_eq!(version, 1);
    }
}
