//! Storage is a substitutable contract: a thin [`sqlx::AnyPool`] wrapper
//! plus a handful of narrow traits (below), so SQLite (tests, single-node
//! deployments) and Postgres share one code path. Grounded on the teacher's
//! `lib/database/mod.rs::Database`, which does the same `AnyKind` dispatch
//! for its schema DDL.

pub mod backfill_store;
pub mod config_store;
pub mod errors;
pub mod event_store;
pub mod workflow_store;

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

pub use self::errors::StorageError;

#[derive(Clone)]
pub struct Database {
    pool: AnyPool,
}

impl Database {
    pub async fn connect(uri: &str) -> Result<Self, StorageError> {
        tracing::debug!("connecting to storage backend");
        let pool = AnyPoolOptions::new().max_connections(10).connect(uri).await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    pub async fn in_memory() -> Result<Self, StorageError> {
        Self::connect("sqlite::memory:").await
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        for statement in self::schema::statements(self.pool.any_kind()) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

/// Hand-written DDL rather than a migration framework: storage is
/// deliberately a thin, swappable layer (spec.md §1), not the system's
/// center of gravity.
mod schema {
    use sqlx::any::AnyKind;

    pub fn statements(kind: AnyKind) -> Vec<String> {
        let autoincrement = match kind {
            | AnyKind::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            | AnyKind::Postgres => "BIGSERIAL PRIMARY KEY",
        };

        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS events (
                    id {autoincrement},
                    workflow_id TEXT NOT NULL,
                    parameter TEXT NOT NULL,
                    counter BIGINT NOT NULL,
                    kind TEXT NOT NULL,
                    recorded_at TEXT NOT NULL,
                    UNIQUE(workflow_id, parameter, counter)
                )"
            ),
            "CREATE TABLE IF NOT EXISTS active_instances (
                workflow_id TEXT NOT NULL,
                parameter TEXT NOT NULL,
                counter BIGINT NOT NULL,
                trigger_id TEXT NOT NULL,
                PRIMARY KEY(workflow_id, parameter)
            )"
            .to_string(),
            "CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                next_natural_trigger TEXT
            )"
            .to_string(),
            "CREATE TABLE IF NOT EXISTS backfills (
                id TEXT PRIMARY KEY,
                body TEXT NOT NULL
            )"
            .to_string(),
            "CREATE TABLE IF NOT EXISTS runtime_config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )"
            .to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connects_and_migrates_in_memory() {
        let db = Database::in_memory().await.unwrap();
        // A second migration pass over the same connection must be a no-op.
        db.run_migrations().await.unwrap();
    }
}
