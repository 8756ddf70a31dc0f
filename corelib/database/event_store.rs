//! Event Log & Snapshot Store (C1): append-only per-instance log plus the
//! active-instance index, atomically maintained together (spec.md §4.1).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use super::errors::StorageError;
use super::Database;
use crate::ids::TriggerId;
use crate::types::event::Event;
use crate::types::instance::WorkflowInstance;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends `event` for `instance`, asserting its `counter` is exactly
    /// `expected_counter`. On success, also upserts the active-instance
    /// index entry in the same transaction. Returns `Conflict` if the
    /// instance's persisted counter no longer matches.
    async fn append(
        &self,
        instance: &WorkflowInstance,
        event: Event,
        expected_counter: u64,
        trigger_id: Option<TriggerId>,
    ) -> Result<u64, StorageError>;

    async fn read_events(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<Vec<Event>, StorageError>;

    async fn index_upsert(
        &self,
        instance: &WorkflowInstance,
        counter: u64,
        trigger_id: TriggerId,
    ) -> Result<(), StorageError>;

    async fn index_remove(&self, instance: &WorkflowInstance) -> Result<(), StorageError>;

    async fn index_read(&self) -> Result<HashMap<WorkflowInstance, u64>, StorageError>;

    async fn index_read_by_trigger_id(
        &self,
        trigger_id: &TriggerId,
    ) -> Result<HashMap<WorkflowInstance, u64>, StorageError>;
}

pub struct SqlEventStore {
    db: Database,
}

impl SqlEventStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EventStore for SqlEventStore {
    async fn append(
        &self,
        instance: &WorkflowInstance,
        event: Event,
        expected_counter: u64,
        trigger_id: Option<TriggerId>,
    ) -> Result<u64, StorageError> {
        let new_counter = expected_counter + 1;
        let kind_json = serde_json::to_string(&event.kind)?;

        let mut tx = self.db.pool().begin().await?;

        // Optimistic-concurrency check: the caller's `expected_counter`
        // must equal the index's current counter (0 if the instance has no
        // index entry yet, i.e. this is its first event).
        let current: Option<i64> = sqlx::query(
            "SELECT counter FROM active_instances WHERE workflow_id = ? AND parameter = ?",
        )
        .bind(instance.workflow_id.to_string())
        .bind(&instance.parameter)
        .fetch_optional(&mut tx)
        .await?
        .map(|row| row.get::<i64, _>("counter"));

        let actual = current.unwrap_or(0) as u64;
        if actual != expected_counter {
            return Err(StorageError::Conflict { expected: expected_counter, actual });
        }

        sqlx::query(
            "INSERT INTO events (workflow_id, parameter, counter, kind, recorded_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(instance.workflow_id.to_string())
        .bind(&instance.parameter)
        .bind(new_counter as i64)
        .bind(&kind_json)
        .bind(event.recorded_at.to_rfc3339())
        .execute(&mut tx)
        .await
        .map_err(super::errors::classify)?;

        if let Some(trigger_id) = trigger_id {
            upsert_index(&mut tx, instance, new_counter, &trigger_id).await?;
        }

        tx.commit().await?;
        Ok(new_counter)
    }

    async fn read_events(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<Vec<Event>, StorageError> {
        let rows = sqlx::query(
            "SELECT counter, kind, recorded_at FROM events \
             WHERE workflow_id = ? AND parameter = ? ORDER BY counter ASC",
        )
        .bind(instance.workflow_id.to_string())
        .bind(&instance.parameter)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                let counter: i64 = row.get("counter");
                let kind_json: String = row.get("kind");
                let recorded_at: String = row.get("recorded_at");
                let kind = serde_json::from_str(&kind_json)?;
                let recorded_at = crate::timeutil::parse_rfc3339(&recorded_at)
                    .unwrap_or_else(|_| Utc::now());
                Ok(Event::new(counter as u64, kind, recorded_at))
            })
            .collect()
    }

    async fn index_upsert(
        &self,
        instance: &WorkflowInstance,
        counter: u64,
        trigger_id: TriggerId,
    ) -> Result<(), StorageError> {
        let mut tx = self.db.pool().begin().await?;
        upsert_index(&mut tx, instance, counter, &trigger_id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn index_remove(&self, instance: &WorkflowInstance) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM active_instances WHERE workflow_id = ? AND parameter = ?")
            .bind(instance.workflow_id.to_string())
            .bind(&instance.parameter)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn index_read(&self) -> Result<HashMap<WorkflowInstance, u64>, StorageError> {
        let rows = sqlx::query("SELECT workflow_id, parameter, counter FROM active_instances")
            .fetch_all(self.db.pool())
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let instance = WorkflowInstance::new(
                    crate::types::workflow::WorkflowId::parse(&row.get::<String, _>("workflow_id"))
                        .expect("persisted workflow_id is always \"component/name\""),
                    row.get::<String, _>("parameter"),
                );
                (instance, row.get::<i64, _>("counter") as u64)
            })
            .collect())
    }

    async fn index_read_by_trigger_id(
        &self,
        trigger_id: &TriggerId,
    ) -> Result<HashMap<WorkflowInstance, u64>, StorageError> {
        let rows = sqlx::query(
            "SELECT workflow_id, parameter, counter FROM active_instances WHERE trigger_id = ?",
        )
        .bind(trigger_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let instance = WorkflowInstance::new(
                    crate::types::workflow::WorkflowId::parse(&row.get::<String, _>("workflow_id"))
                        .expect("persisted workflow_id is always \"component/name\""),
                    row.get::<String, _>("parameter"),
                );
                (instance, row.get::<i64, _>("counter") as u64)
            })
            .collect())
    }
}

async fn upsert_index(
    tx: &mut sqlx::Transaction<'_, sqlx::Any>,
    instance: &WorkflowInstance,
    counter: u64,
    trigger_id: &TriggerId,
) -> Result<(), StorageError> {
    sqlx::query("DELETE FROM active_instances WHERE workflow_id = ? AND parameter = ?")
        .bind(instance.workflow_id.to_string())
        .bind(&instance.parameter)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "INSERT INTO active_instances (workflow_id, parameter, counter, trigger_id) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(instance.workflow_id.to_string())
    .bind(&instance.parameter)
    .bind(counter as i64)
    .bind(trigger_id)
    .execute(&mut *tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::EventKind;
    use crate::types::workflow::WorkflowId;

    async fn store() -> SqlEventStore {
        SqlEventStore::new(Database::in_memory().await.unwrap())
    }

    fn instance() -> WorkflowInstance {
        WorkflowInstance::new(WorkflowId::new("demo", "wf-1"), "2020-01-01")
    }

    #[tokio::test]
    async fn append_assigns_monotonic_counters() {
        let store = store().await;
        let instance = instance();
        let c1 = store
            .append(
                &instance,
                Event::new(0, EventKind::TriggerExecution {
                    trigger_id: "natural-1".to_string(),
                    trigger_parameters: serde_json::json!({}),
                }, Utc::now()),
                0,
                Some("natural-1".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(c1, 1);

        let c2 = store
            .append(&instance, Event::new(0, EventKind::Dequeue, Utc::now()), 1, None)
            .await
            .unwrap();
        assert_eq!(c2, 2);

        let events = store.read_events(&instance).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn stale_expected_counter_conflicts() {
        let store = store().await;
        let instance = instance();
        store
            .append(&instance, Event::new(0, EventKind::Dequeue, Utc::now()), 0, None)
            .await
            .unwrap();

        let err = store
            .append(&instance, Event::new(0, EventKind::Dequeue, Utc::now()), 0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { expected: 0, actual: 1 }));
    }

    #[tokio::test]
    async fn index_read_by_trigger_id_filters() {
        let store = store().await;
        let instance = instance();
        store
            .append(&instance, Event::new(0, EventKind::Dequeue, Utc::now()), 0, Some("t-1".to_string()))
            .await
            .unwrap();

        let by_trigger = store.index_read_by_trigger_id(&"t-1".to_string()).await.unwrap();
        assert_eq!(by_trigger.len(), 1);
        let by_other = store.index_read_by_trigger_id(&"t-2".to_string()).await.unwrap();
        assert!(by_other.is_empty());
    }
}
