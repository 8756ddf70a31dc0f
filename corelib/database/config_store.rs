//! Global runtime config table (spec.md §3): currently just the submission
//! rate limiter's permits-per-second, refreshed periodically by C9.

use async_trait::async_trait;
use sqlx::Row;

use super::errors::StorageError;
use super::Database;

const SUBMISSION_RATE_KEY: &str = "submission_rate_per_sec";

#[async_trait]
pub trait RuntimeConfigStore: Send + Sync {
    async fn get_submission_rate(&self) -> Result<Option<f64>, StorageError>;

    async fn set_submission_rate(&self, rate_per_sec: f64) -> Result<(), StorageError>;
}

pub struct SqlRuntimeConfigStore {
    db: Database,
}

impl SqlRuntimeConfigStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RuntimeConfigStore for SqlRuntimeConfigStore {
    async fn get_submission_rate(&self) -> Result<Option<f64>, StorageError> {
        let row = sqlx::query("SELECT value FROM runtime_config WHERE key = ?")
            .bind(SUBMISSION_RATE_KEY)
            .fetch_optional(self.db.pool())
            .await?;
        row.map(|row| {
            row.get::<String, _>("value")
                .parse::<f64>()
                .map_err(|_| StorageError::NotFound)
        })
        .transpose()
    }

    async fn set_submission_rate(&self, rate_per_sec: f64) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO runtime_config (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(SUBMISSION_RATE_KEY)
        .bind(rate_per_sec.to_string())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }
}
