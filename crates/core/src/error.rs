use crate::types::DbId;

/// Domain failures surfaced to callers of the core crate.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    /// Input or stored data violates a domain rule.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The requester is known but may not act on the target.
    #[error("Forbidden: {0}")]
    Forbidden(String),
}
