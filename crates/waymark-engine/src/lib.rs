pub mod api;
pub mod context;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod worker;

pub use api::{cancel_workflow, query_workflow, signal_workflow, start_workflow, wait_workflow};
pub use context::{Context, Step, StepEffects, WorkflowSignal};
pub use error::EngineError;
pub use registry::{
    ActivityFn, ActivityRegistration, QueryFn, Registry, WorkflowFn, WorkflowRegistration, SLEEP_ACTIVITY_NAME,
};
pub use worker::{Worker, WorkerConfig};
