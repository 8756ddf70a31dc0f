//! Storage error taxonomy, grounded on the teacher's
//! `lib/database/errors.rs::DatabaseError` — including its unique-constraint
//! sniffing, extended with a `Conflict` variant for the event log's
//! optimistic-concurrency contract (spec.md §4.1, §7).

use thiserror::Error;

const SQLITE_UNIQUE_CONSTRAINT_CODE: &str = "2067";
const POSTGRES_UNIQUE_CONSTRAINT_CODE: &str = "23505";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("failed to (de)serialize stored record: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("duplicate record")]
    DuplicateRecord,

    /// The event log's `append(event, expectedCounter)` contract: the
    /// instance's current counter no longer matches `expectedCounter`.
    #[error("optimistic concurrency conflict: expected counter {expected}, found {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("record not found")]
    NotFound,
}

impl StorageError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StorageError::DuplicateRecord)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    let Some(db_err) = err.as_database_error() else { return false };
    match db_err.code() {
        | Some(code) => {
            code == SQLITE_UNIQUE_CONSTRAINT_CODE || code == POSTGRES_UNIQUE_CONSTRAINT_CODE
        }
        | None => false,
    }
}

/// sqlx's `AnyPool` erases the backend, so duplicate-key detection has to
/// go through the generic `DatabaseError` code rather than downcasting to
/// a backend-specific error type the way the teacher's sea-orm path does.
pub fn classify(err: sqlx::Error) -> StorageError {
    if is_unique_violation(&err) {
        StorageError::DuplicateRecord
    } else if matches!(err, sqlx::Error::RowNotFound) {
        StorageError::NotFound
    } else {
        StorageError::Query(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_classifies_as_not_found() {
        let err = classify(sqlx::Error::RowNotFound);
        assert!(matches!(err, StorageError::NotFound));
    }
}
