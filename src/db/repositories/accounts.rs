use crate::db::models::camera_models::Account;
use crate::error::Error;
use crate::workflow::plan::ActionPlanTemplate;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Source of per-account action-plan templates
#[async_trait]
pub trait TemplateSource: Send + Sync {
    /// Parsed action-plan template for an account, if one is configured
    async fn action_plan(&self, account_id: &Uuid) -> Result<Option<ActionPlanTemplate>>;
}

/// Accounts repository for account lookups
#[derive(Clone)]
pub struct AccountsRepository {
    pool: Arc<PgPool>,
}

impl AccountsRepository {
    /// Create a new accounts repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Get account by ID
    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<Account>> {
        let result = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, name, action_plan, created_at
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get account by ID: {}", e)))?;

        Ok(result)
    }
}

#[async_trait]
impl TemplateSource for AccountsRepository {
    async fn action_plan(&self, account_id: &Uuid) -> Result<Option<ActionPlanTemplate>> {
        let account = self.get_by_id(account_id).await?;

        match account.and_then(|a| a.action_plan) {
            Some(value) => {
                let template: ActionPlanTemplate = serde_json::from_value(value).map_err(|e| {
                    Error::Serialization(format!(
                        "Invalid action plan for account {}: {}",
                        account_id, e
                    ))
                })?;
                Ok(Some(template))
            }
            None => Ok(None),
        }
    }
}
