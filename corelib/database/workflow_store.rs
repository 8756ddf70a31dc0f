//! Workflow registration storage plus the `nextNaturalTrigger` counter the
//! Trigger Manager (C7) advances on every natural trigger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use super::errors::StorageError;
use super::Database;
use crate::types::workflow::{Workflow, WorkflowId};

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn upsert(
        &self,
        workflow: &Workflow,
        next_natural_trigger: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    async fn get(&self, id: &WorkflowId) -> Result<Option<Workflow>, StorageError>;

    /// All registered workflows, with their current `nextNaturalTrigger`.
    async fn list_due_for_trigger(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Workflow, DateTime<Utc>)>, StorageError>;

    /// Atomically advances `nextNaturalTrigger` for `id`, asserting the
    /// caller observed `expected_current` — guards against two trigger
    /// manager ticks racing on the same workflow.
    async fn advance_next_natural_trigger(
        &self,
        id: &WorkflowId,
        expected_current: DateTime<Utc>,
        new_value: DateTime<Utc>,
    ) -> Result<(), StorageError>;
}

pub struct SqlWorkflowStore {
    db: Database,
}

impl SqlWorkflowStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl WorkflowStore for SqlWorkflowStore {
    async fn upsert(
        &self,
        workflow: &Workflow,
        next_natural_trigger: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let body = serde_json::to_string(workflow)?;
        sqlx::query(
            "INSERT INTO workflows (id, body, next_natural_trigger) VALUES (?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET body = excluded.body",
        )
        .bind(workflow.id.to_string())
        .bind(&body)
        .bind(next_natural_trigger.to_rfc3339())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn get(&self, id: &WorkflowId) -> Result<Option<Workflow>, StorageError> {
        let row = sqlx::query("SELECT body FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await?;
        row.map(|row| Ok(serde_json::from_str(&row.get::<String, _>("body"))?))
            .transpose()
    }

    async fn list_due_for_trigger(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Workflow, DateTime<Utc>)>, StorageError> {
        let rows = sqlx::query(
            "SELECT body, next_natural_trigger FROM workflows WHERE next_natural_trigger <= ?",
        )
        .bind(now.to_rfc3339())
        .fetch_all(self.db.pool())
        .await?;

        let mut due = Vec::with_capacity(rows.len());
        for row in rows {
            let workflow: Workflow = serde_json::from_str(&row.get::<String, _>("body"))?;
            let next = crate::timeutil::parse_rfc3339(&row.get::<String, _>("next_natural_trigger"))
                .expect("persisted timestamps are always valid RFC3339");
            due.push((workflow, next));
        }
        Ok(due)
    }

    async fn advance_next_natural_trigger(
        &self,
        id: &WorkflowId,
        expected_current: DateTime<Utc>,
        new_value: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE workflows SET next_natural_trigger = ? \
             WHERE id = ? AND next_natural_trigger = ?",
        )
        .bind(new_value.to_rfc3339())
        .bind(id.to_string())
        .bind(expected_current.to_rfc3339())
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict { expected: 0, actual: 0 });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::workflow::Configuration;

    fn workflow() -> Workflow {
        Workflow {
            id: WorkflowId::new("demo", "wf-1"),
            schedule: crate::schedule::Schedule::Days,
            configuration: Configuration::default(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn upsert_and_get_round_trips() {
        let store = SqlWorkflowStore::new(Database::in_memory().await.unwrap());
        store.upsert(&workflow(), Utc::now()).await.unwrap();
        let fetched = store.get(&WorkflowId::new("demo", "wf-1")).await.unwrap().unwrap();
        assert_eq!(fetched.id, WorkflowId::new("demo", "wf-1"));
    }

    #[tokio::test]
    async fn due_for_trigger_filters_by_time() {
        let store = SqlWorkflowStore::new(Database::in_memory().await.unwrap());
        let past = Utc::now() - chrono::Duration::hours(1);
        store.upsert(&workflow(), past).await.unwrap();

        let due = store.list_due_for_trigger(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn advance_rejects_stale_expectation() {
        let store = SqlWorkflowStore::new(Database::in_memory().await.unwrap());
        let now = Utc::now();
        store.upsert(&workflow(), now).await.unwrap();

        let err = store
            .advance_next_natural_trigger(
                &WorkflowId::new("demo", "wf-1"),
                now - chrono::Duration::seconds(1),
                now + chrono::Duration::hours(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));
    }
}
