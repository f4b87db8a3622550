use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Camera model. Cameras are provisioned by external account management and
/// read-only to this service.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Camera {
    pub id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    /// Live feed address (e.g. an RTSP URL); absent means no feed available
    pub source_url: Option<String>,
    /// Local-part of the camera's unique ingestion mail address
    pub ingest_alias: String,
    /// Optional operator quick-actions associated with this camera
    pub quick_actions: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Monitored account owning cameras and an action-plan template
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    /// Action-plan template steps as stored JSON (see workflow::plan)
    pub action_plan: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
