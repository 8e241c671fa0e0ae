use thiserror::Error;

/// Errors surfaced across the command surface (spec.md §7).
///
/// `ProbeOutcome`, `TransientTranscoderExit`, `TerminalTranscoderFailure`,
/// `StitchFailure`, `StorageIOError` and `PersistenceIOError` are *not*
/// represented here: per spec.md §7 those are consumed internally by the
/// supervisor/custodian and reflected onto the persisted recording fields
/// instead of being returned synchronously to a caller.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}
