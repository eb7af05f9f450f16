use thiserror::Error;
use waymark_types::ExecutionId;

/// Persistence-layer failures.
///
/// Distinct from [`waymark_types::ExecutionError`]: this enum covers *storage*
/// failures (a lease lost, a row missing, the database unreachable), not
/// workflow-domain failures. The engine maps `NotFound`/`Conflict` into its own
/// `EngineError`; it never surfaces a `StoreError` to a workflow body.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("execution {0} not found")]
    NotFound(ExecutionId),

    #[error("activity task {0} not found or no longer leased")]
    TaskNotFound(i64),

    #[error("execution {0} is already terminal")]
    AlreadyTerminal(ExecutionId),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}
