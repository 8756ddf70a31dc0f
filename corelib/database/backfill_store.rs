//! Backfill records (spec.md §3): owned by the backfill engine (C8) and
//! mutated only while holding the row, via the `read_then_update` contract
//! below — mirroring the teacher's pattern of mutating `TriggerStore`
//! records through a fetched `ActiveModel` rather than blind `UPDATE`s.

use async_trait::async_trait;
use sqlx::Row;

use super::errors::StorageError;
use super::Database;
use crate::ids::BackfillId;
use crate::model::ModelId;
use crate::types::backfill::Backfill;

#[async_trait]
pub trait BackfillStore: Send + Sync {
    async fn create(&self, backfill: &Backfill) -> Result<(), StorageError>;

    async fn get(&self, id: &BackfillId) -> Result<Option<Backfill>, StorageError>;

    async fn list(&self) -> Result<Vec<Backfill>, StorageError>;

    async fn list_runnable(&self) -> Result<Vec<Backfill>, StorageError>;

    /// Fetches the current row, applies `mutate`, and persists the result
    /// in the same round trip — the storage-level equivalent of "mutated
    /// only inside a transaction holding the row" from spec.md §3. Boxed
    /// rather than generic so the trait stays object-safe — callers hold
    /// this store behind `Arc<dyn BackfillStore>`.
    async fn read_then_update(
        &self,
        id: &BackfillId,
        mutate: Box<dyn for<'a> FnOnce(&'a mut Backfill) + Send>,
    ) -> Result<Backfill, StorageError>;
}

pub struct SqlBackfillStore {
    db: Database,
}

impl SqlBackfillStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn save(&self, backfill: &Backfill) -> Result<(), StorageError> {
        let body = serde_json::to_string(backfill)?;
        sqlx::query(
            "UPDATE backfills SET body = ? WHERE id = ?",
        )
        .bind(&body)
        .bind(backfill.id.value())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BackfillStore for SqlBackfillStore {
    async fn create(&self, backfill: &Backfill) -> Result<(), StorageError> {
        let body = serde_json::to_string(backfill)?;
        sqlx::query("INSERT INTO backfills (id, body) VALUES (?, ?)")
            .bind(backfill.id.value())
            .bind(&body)
            .execute(self.db.pool())
            .await
            .map_err(super::errors::classify)?;
        Ok(())
    }

    async fn get(&self, id: &BackfillId) -> Result<Option<Backfill>, StorageError> {
        let row = sqlx::query("SELECT body FROM backfills WHERE id = ?")
            .bind(id.value())
            .fetch_optional(self.db.pool())
            .await?;
        row.map(|row| Ok(serde_json::from_str(&row.get::<String, _>("body"))?))
            .transpose()
    }

    async fn list(&self) -> Result<Vec<Backfill>, StorageError> {
        let rows = sqlx::query("SELECT body FROM backfills").fetch_all(self.db.pool()).await?;
        rows.into_iter()
            .map(|row| Ok(serde_json::from_str(&row.get::<String, _>("body"))?))
            .collect()
    }

    async fn list_runnable(&self) -> Result<Vec<Backfill>, StorageError> {
        Ok(self.list().await?.into_iter().filter(Backfill::is_runnable).collect())
    }

    async fn read_then_update(
        &self,
        id: &BackfillId,
        mutate: Box<dyn for<'a> FnOnce(&'a mut Backfill) + Send>,
    ) -> Result<Backfill, StorageError> {
        let mut backfill = self.get(id).await?.ok_or(StorageError::NotFound)?;
        mutate(&mut backfill);
        self.save(&backfill).await?;
        Ok(backfill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::workflow::WorkflowId;

    fn backfill() -> Backfill {
        let now = chrono::Utc::now();
        Backfill {
            id: BackfillId::generate(),
            workflow_id: WorkflowId::new("demo", "wf-1"),
            start: now,
            end: now + chrono::Duration::days(4),
            schedule: crate::schedule::Schedule::Days,
            concurrency: 2,
            next_trigger: now,
            description: None,
            reverse: false,
            all_triggered: false,
            halted: false,
            trigger_parameters: None,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = SqlBackfillStore::new(Database::in_memory().await.unwrap());
        let backfill = backfill();
        store.create(&backfill).await.unwrap();
        let fetched = store.get(&backfill.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, backfill.id);
    }

    #[tokio::test]
    async fn read_then_update_persists_mutation() {
        let store = SqlBackfillStore::new(Database::in_memory().await.unwrap());
        let backfill = backfill();
        store.create(&backfill).await.unwrap();

        let updated = store
            .read_then_update(&backfill.id, Box::new(|b| b.halted = true))
            .await
            .unwrap();
        assert!(updated.halted);

        let refetched = store.get(&backfill.id).await.unwrap().unwrap();
        assert!(refetched.halted);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = SqlBackfillStore::new(Database::in_memory().await.unwrap());
        let backfill = backfill();
        store.create(&backfill).await.unwrap();
        let err = store.create(&backfill).await.unwrap_err();
        assert!(err.is_duplicate());
    }
}
