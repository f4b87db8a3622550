use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alarm event model. Created exactly once by the ingestion pipeline, mutated
/// only by the workflow engine, never deleted here (retention is external).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub id: Uuid,
    pub camera_id: Uuid,
    pub account_id: Uuid,
    /// Reception timestamp in the fixed reference timezone (UTC); never mutated
    pub created_at: DateTime<Utc>,
    /// Media-store-relative attachment paths in original attachment order
    #[sqlx(json)]
    pub media_paths: Vec<String>,
    pub notes: String,
    /// Append-only operator call log
    #[sqlx(json)]
    pub call_logs: Vec<CallLog>,
    /// Lifecycle status (see workflow::status)
    pub status: String,
    /// Resolution reason, set once on resolve
    pub resolution: Option<String>,
}

impl Event {
    /// Fresh event as the ingestion pipeline creates it
    pub fn new(camera_id: Uuid, account_id: Uuid, media_paths: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            camera_id,
            account_id,
            created_at: Utc::now(),
            media_paths,
            notes: String::new(),
            call_logs: Vec::new(),
            status: "new".to_string(),
            resolution: None,
        }
    }
}

/// One operator call entry attached to an event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallLog {
    pub contact_name: String,
    pub phone: String,
    pub outcome: String,
    pub note: String,
    pub logged_at: DateTime<Utc>,
}
