pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use models::{
    ActivityTask, ActivityTaskStatus, ExecutionRow, ExecutionSnapshot, NewActivityTask, NewExecution,
    PendingSignal, StepCommit, TaskOutcome,
};
pub use postgres::PgStore;
pub use store::Store;
