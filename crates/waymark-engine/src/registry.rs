use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration as StdDuration;

use once_cell::sync::Lazy;
use waymark_persistence::ExecutionSnapshot;
use waymark_types::{ExecutionError, Payload, RetryPolicy};

use crate::context::{Context, Step};

/// Never user-registered; `Context::sleep` schedules against it directly.
pub use waymark_types::SLEEP_ACTIVITY_NAME;

pub type WorkflowFuture = Pin<Box<dyn Future<Output = Step<Payload>> + Send>>;
pub type WorkflowFn = Arc<dyn Fn(Context, Payload) -> WorkflowFuture + Send + Sync>;

pub type ActivityFuture = Pin<Box<dyn Future<Output = Result<Payload, ExecutionError>> + Send>>;
pub type ActivityFn = Arc<dyn Fn(Payload) -> ActivityFuture + Send + Sync>;

/// A read-only handler scoped to one workflow type, given the execution's
/// current snapshot (never mutated) plus the caller-supplied query payload.
pub type QueryFn = Arc<dyn Fn(&ExecutionSnapshot, Payload) -> Result<Payload, ExecutionError> + Send + Sync>;

/// A registered workflow body plus its registration-time defaults.
#[derive(Clone)]
pub struct WorkflowRegistration {
    pub f: WorkflowFn,
    /// Schedule-to-close deadline applied to `start_workflow` callers that
    /// don't pass their own `timeout_at`.
    pub timeout: Option<StdDuration>,
}

/// A registered activity body plus its registration-time defaults.
#[derive(Clone)]
pub struct ActivityRegistration {
    pub f: ActivityFn,
    /// Schedule-to-close deadline, applied to every task scheduled against
    /// this activity unless the call site overrides it.
    pub timeout: Option<StdDuration>,
    pub heartbeat_timeout: Option<StdDuration>,
    /// Default retry policy, used when a `run_activity`/`start_activity`
    /// call site passes `None`.
    pub retry_policy: Option<RetryPolicy>,
}

/// Maps string names to workflow and activity implementations, plus
/// per-workflow read-only query handlers.
///
/// Registration is expected to happen once at process start; lookups happen
/// on every scheduler step and worker tick, so the map is optimized for
/// concurrent reads via `RwLock` rather than a queue or channel.
#[derive(Default, Clone)]
pub struct Registry {
    workflows: HashMap<String, WorkflowRegistration>,
    activities: HashMap<String, ActivityRegistration>,
    queries: HashMap<(String, String), QueryFn>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the process-wide global registry's current contents.
    ///
    /// A cloned snapshot rather than a shared handle: `Registry`'s maps hold
    /// cheaply-`Clone`able `Arc<dyn Fn>` entries, so this is a shallow copy,
    /// and it lets a caller (the worker, the CLI) hold a stable `Registry` for
    /// the duration of a tick without contending the global lock on every
    /// lookup.
    pub fn global() -> Self {
        GLOBAL_REGISTRY.read().unwrap().clone()
    }

    /// Registers a workflow body. Panics on a duplicate `name`: a collision
    /// here is a programming error caught at process init, not a runtime
    /// condition a caller can recover from.
    pub fn register_workflow(&mut self, name: impl Into<String>, f: WorkflowFn, timeout: Option<StdDuration>) {
        let name = name.into();
        if self
            .workflows
            .insert(name.clone(), WorkflowRegistration { f, timeout })
            .is_some()
        {
            panic!("workflow {name:?} registered twice");
        }
    }

    /// Registers an activity body. `name` must not be [`SLEEP_ACTIVITY_NAME`].
    pub fn register_activity(
        &mut self,
        name: impl Into<String>,
        f: ActivityFn,
        timeout: Option<StdDuration>,
        heartbeat_timeout: Option<StdDuration>,
        retry_policy: Option<RetryPolicy>,
    ) {
        let name = name.into();
        assert_ne!(name, SLEEP_ACTIVITY_NAME, "{name:?} is reserved for durable timers");
        let registration = ActivityRegistration { f, timeout, heartbeat_timeout, retry_policy };
        if self.activities.insert(name.clone(), registration).is_some() {
            panic!("activity {name:?} registered twice");
        }
    }

    /// Registers a read-only query handler scoped to one workflow type.
    pub fn register_query(
        &mut self,
        workflow_name: impl Into<String>,
        query_name: impl Into<String>,
        f: QueryFn,
    ) {
        let key = (workflow_name.into(), query_name.into());
        if self.queries.insert(key.clone(), f).is_some() {
            panic!("query {:?} registered twice for workflow {:?}", key.1, key.0);
        }
    }

    pub fn lookup_workflow(&self, name: &str) -> Option<WorkflowRegistration> {
        self.workflows.get(name).cloned()
    }

    pub fn lookup_activity(&self, name: &str) -> Option<ActivityRegistration> {
        self.activities.get(name).cloned()
    }

    pub fn lookup_query(&self, workflow_name: &str, query_name: &str) -> Option<QueryFn> {
        self.queries
            .get(&(workflow_name.to_string(), query_name.to_string()))
            .cloned()
    }
}

static GLOBAL_REGISTRY: Lazy<RwLock<Registry>> = Lazy::new(|| RwLock::new(Registry::new()));

/// Registers a workflow into the process-wide global registry. Hosts that
/// prefer an isolated registry (tests, multi-tenant embedding) should build a
/// private [`Registry`] instead and pass it explicitly.
pub fn register_workflow(name: impl Into<String>, f: WorkflowFn, timeout: Option<StdDuration>) {
    GLOBAL_REGISTRY.write().unwrap().register_workflow(name, f, timeout);
}

pub fn register_activity(
    name: impl Into<String>,
    f: ActivityFn,
    timeout: Option<StdDuration>,
    heartbeat_timeout: Option<StdDuration>,
    retry_policy: Option<RetryPolicy>,
) {
    GLOBAL_REGISTRY
        .write()
        .unwrap()
        .register_activity(name, f, timeout, heartbeat_timeout, retry_policy);
}

pub fn register_query(workflow_name: impl Into<String>, query_name: impl Into<String>, f: QueryFn) {
    GLOBAL_REGISTRY.write().unwrap().register_query(workflow_name, query_name, f);
}

pub fn lookup_workflow(name: &str) -> Option<WorkflowRegistration> {
    GLOBAL_REGISTRY.read().unwrap().lookup_workflow(name)
}

pub fn lookup_activity(name: &str) -> Option<ActivityRegistration> {
    GLOBAL_REGISTRY.read().unwrap().lookup_activity(name)
}

pub fn lookup_query(workflow_name: &str, query_name: &str) -> Option<QueryFn> {
    GLOBAL_REGISTRY.read().unwrap().lookup_query(workflow_name, query_name)
}
