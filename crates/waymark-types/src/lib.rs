pub mod error;
pub mod event;
pub mod execution_error;
pub mod ids;
pub mod journal;
pub mod payload;
pub mod retry;

pub use error::DomainError;
pub use event::{EventType, SLEEP_ACTIVITY_NAME};
pub use execution_error::{ErrorKind, ExecutionError};
pub use ids::{ActivityHandle, ExecutionId, Pos};
pub use journal::{ExecutionJournal, ExecutionStatus, HistoryEvent};
pub use payload::Payload;
pub use retry::{RetryPolicy, RetryStrategy};
