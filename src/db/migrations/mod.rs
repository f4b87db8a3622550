use anyhow::Result;
use log::info;
use sqlx::PgPool;

/// Schema statements applied in order on startup. All statements are
/// idempotent so reruns are safe.
const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        action_plan JSONB,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cameras (
        id UUID PRIMARY KEY,
        account_id UUID NOT NULL REFERENCES accounts(id),
        name TEXT NOT NULL,
        source_url TEXT,
        ingest_alias TEXT NOT NULL UNIQUE,
        quick_actions JSONB,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id UUID PRIMARY KEY,
        camera_id UUID NOT NULL REFERENCES cameras(id),
        account_id UUID NOT NULL REFERENCES accounts(id),
        created_at TIMESTAMPTZ NOT NULL,
        media_paths JSONB NOT NULL DEFAULT '[]'::jsonb,
        notes TEXT NOT NULL DEFAULT '',
        call_logs JSONB NOT NULL DEFAULT '[]'::jsonb,
        status TEXT NOT NULL DEFAULT 'new',
        resolution TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_events_account ON events(account_id)",
    "CREATE INDEX IF NOT EXISTS idx_events_camera ON events(camera_id)",
    "CREATE INDEX IF NOT EXISTS idx_cameras_alias ON cameras(ingest_alias)",
];

/// Apply all migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for statement in MIGRATIONS {
        sqlx::query(statement).execute(pool).await?;
    }

    info!("Applied {} schema statements", MIGRATIONS.len());
    Ok(())
}
