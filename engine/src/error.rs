//! Error taxonomy for the engine, mirrored 1:1 on spec.md §7 and mapped onto
//! HTTP status by the `api` crate's `ApiError`, the way the teacher maps
//! `tonic::Status` onto `ApiError` in `api/errors.rs`.

use corelib::database::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("illegal transition: {0}")]
    IllegalTransition(String),

    #[error("optimistic concurrency conflict")]
    OptimisticConflict,

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),

    #[error("runner error: {0}")]
    RunnerError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("the state manager is closed")]
    IsClosed,
}

impl EngineError {
    /// True for errors a caller may retry once without changing its
    /// request (spec.md §7: `OptimisticConflict` is "retried once then
    /// fails").
    pub fn is_retryable_once(&self) -> bool {
        matches!(self, EngineError::OptimisticConflict)
    }
}
