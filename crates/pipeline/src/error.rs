use worktrace_core::store::StoreError;

/// Errors that abort an aggregation run before any session is written.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid aggregation range: {0}")]
    InvalidRange(String),
}
