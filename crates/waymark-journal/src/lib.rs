pub mod error;
pub mod invariants;
pub mod replay;
pub mod resolution;
pub mod status;

pub use error::{JournalError, JournalViolation};
pub use invariants::{validate_journal, InvariantState};
pub use replay::{InvokeOutcome, ReplayCache};
pub use status::derive_status;
