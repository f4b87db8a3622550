use crate::db::models::event_models::{CallLog, Event};
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Durable event record operations. The ingestion pipeline inserts, the
/// workflow engine mutates; nothing here deletes.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist a freshly ingested event
    async fn insert(&self, event: &Event) -> Result<()>;

    /// Fetch an event by id
    async fn get(&self, id: &Uuid) -> Result<Option<Event>>;

    /// Replace lifecycle status (and resolution when resolving)
    async fn update_status(
        &self,
        id: &Uuid,
        status: &str,
        resolution: Option<&str>,
    ) -> Result<Event>;

    /// Replace operator notes
    async fn set_notes(&self, id: &Uuid, notes: &str) -> Result<Event>;

    /// Append one call log entry
    async fn append_call_log(&self, id: &Uuid, entry: &CallLog) -> Result<Event>;
}

const EVENT_COLUMNS: &str =
    "id, camera_id, account_id, created_at, media_paths, notes, call_logs, status, resolution";

/// Events repository for handling alarm event records
#[derive(Clone)]
pub struct EventsRepository {
    pool: Arc<PgPool>,
}

impl EventsRepository {
    /// Create a new events repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for EventsRepository {
    async fn insert(&self, event: &Event) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (
                id, camera_id, account_id, created_at, media_paths, notes, call_logs, status, resolution
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.id)
        .bind(event.camera_id)
        .bind(event.account_id)
        .bind(event.created_at)
        .bind(serde_json::to_value(&event.media_paths)?)
        .bind(&event.notes)
        .bind(serde_json::to_value(&event.call_logs)?)
        .bind(&event.status)
        .bind(&event.resolution)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create event: {}", e)))?;

        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Event>> {
        let result = sqlx::query_as::<_, Event>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get event by ID: {}", e)))?;

        Ok(result)
    }

    async fn update_status(
        &self,
        id: &Uuid,
        status: &str,
        resolution: Option<&str>,
    ) -> Result<Event> {
        let result = sqlx::query_as::<_, Event>(&format!(
            r#"
            UPDATE events
            SET status = $2, resolution = COALESCE($3, resolution)
            WHERE id = $1
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status)
        .bind(resolution)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update event status: {}", e)))?;

        Ok(result)
    }

    async fn set_notes(&self, id: &Uuid, notes: &str) -> Result<Event> {
        let result = sqlx::query_as::<_, Event>(&format!(
            r#"
            UPDATE events
            SET notes = $2
            WHERE id = $1
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(notes)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update event notes: {}", e)))?;

        Ok(result)
    }

    async fn append_call_log(&self, id: &Uuid, entry: &CallLog) -> Result<Event> {
        let result = sqlx::query_as::<_, Event>(&format!(
            r#"
            UPDATE events
            SET call_logs = call_logs || $2::jsonb
            WHERE id = $1
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(serde_json::to_value(entry)?)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to append call log: {}", e)))?;

        Ok(result)
    }
}
