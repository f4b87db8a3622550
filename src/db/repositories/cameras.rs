use crate::db::models::camera_models::Camera;
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Camera lookup seam used by the ingestion pipeline and stream supervisor
#[async_trait]
pub trait CameraDirectory: Send + Sync {
    /// Resolve the local-part of an ingestion mail address to a camera
    async fn camera_by_alias(&self, alias: &str) -> Result<Option<Camera>>;

    /// Fetch a camera by id
    async fn camera_by_id(&self, id: &Uuid) -> Result<Option<Camera>>;
}

/// Cameras repository for camera lookups
#[derive(Clone)]
pub struct CamerasRepository {
    pool: Arc<PgPool>,
}

impl CamerasRepository {
    /// Create a new cameras repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Get all cameras
    pub async fn get_all(&self) -> Result<Vec<Camera>> {
        let result = sqlx::query_as::<_, Camera>(
            r#"
            SELECT id, account_id, name, source_url, ingest_alias, quick_actions, created_at
            FROM cameras
            ORDER BY name
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get cameras: {}", e)))?;

        Ok(result)
    }
}

#[async_trait]
impl CameraDirectory for CamerasRepository {
    async fn camera_by_alias(&self, alias: &str) -> Result<Option<Camera>> {
        let result = sqlx::query_as::<_, Camera>(
            r#"
            SELECT id, account_id, name, source_url, ingest_alias, quick_actions, created_at
            FROM cameras
            WHERE ingest_alias = $1
            "#,
        )
        .bind(alias)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get camera by alias: {}", e)))?;

        Ok(result)
    }

    async fn camera_by_id(&self, id: &Uuid) -> Result<Option<Camera>> {
        let result = sqlx::query_as::<_, Camera>(
            r#"
            SELECT id, account_id, name, source_url, ingest_alias, quick_actions, created_at
            FROM cameras
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get camera by ID: {}", e)))?;

        Ok(result)
    }
}
