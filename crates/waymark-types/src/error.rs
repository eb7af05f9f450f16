use thiserror;

/// Errors that can occur while constructing or inspecting the core domain
/// types, independent of persistence or scheduling concerns.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("value is not JSON round-trippable: {0}")]
    Serialization(#[from] serde_json::Error),
}
