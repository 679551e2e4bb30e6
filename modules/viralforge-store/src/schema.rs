use sqlx::PgPool;

use viralforge_common::error::{ForgeError, Result};

/// Idempotent schema bootstrap. Each statement is `IF NOT EXISTS`; safe
/// to run on every worker start.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    let statements = [
        r"
        CREATE TABLE IF NOT EXISTS content_candidates (
            id TEXT PRIMARY KEY,
            platform TEXT NOT NULL,
            url TEXT NOT NULL,
            author TEXT NOT NULL DEFAULT '',
            title TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            thumbnail_url TEXT,
            views BIGINT NOT NULL DEFAULT 0,
            engagement_score DOUBLE PRECISION NOT NULL DEFAULT 0,
            viral_score DOUBLE PRECISION NOT NULL DEFAULT 0,
            duration_seconds DOUBLE PRECISION NOT NULL DEFAULT 0,
            discovered_at TIMESTAMPTZ NOT NULL,
            tags JSONB NOT NULL DEFAULT '[]',
            niche TEXT NOT NULL DEFAULT '',
            metadata JSONB NOT NULL DEFAULT '{}'
        )",
        r"
        CREATE TABLE IF NOT EXISTS viral_patterns (
            content_id TEXT PRIMARY KEY REFERENCES content_candidates(id),
            id UUID NOT NULL,
            hook_score DOUBLE PRECISION NOT NULL,
            retention_estimate DOUBLE PRECISION NOT NULL,
            pacing_bpm DOUBLE PRECISION,
            style_keywords JSONB NOT NULL DEFAULT '[]',
            emotional_triggers JSONB NOT NULL DEFAULT '[]',
            analyzed_at TIMESTAMPTZ NOT NULL
        )",
        r"
        CREATE TABLE IF NOT EXISTS monitored_niches (
            niche TEXT PRIMARY KEY,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            last_scanned_at TIMESTAMPTZ
        )",
        r"
        CREATE TABLE IF NOT EXISTS niche_trends (
            niche TEXT PRIMARY KEY,
            platform TEXT NOT NULL,
            top_keywords JSONB NOT NULL DEFAULT '[]',
            avg_engagement DOUBLE PRECISION NOT NULL DEFAULT 0,
            last_updated TIMESTAMPTZ NOT NULL
        )",
        r"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            kind TEXT NOT NULL,
            owner_id BIGINT NOT NULL DEFAULT 0,
            title TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,
            progress SMALLINT NOT NULL DEFAULT 0,
            input_ref TEXT NOT NULL,
            output_ref TEXT,
            error TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )",
        r"CREATE INDEX IF NOT EXISTS jobs_input_ref_idx ON jobs (input_ref)",
        r"
        CREATE TABLE IF NOT EXISTS social_tokens (
            platform TEXT NOT NULL,
            account_handle TEXT NOT NULL,
            access_token TEXT NOT NULL,
            refresh_token TEXT,
            token_type TEXT,
            scope TEXT,
            expires_at TIMESTAMPTZ,
            owner_id BIGINT NOT NULL DEFAULT 0,
            PRIMARY KEY (platform, account_handle)
        )",
        r"
        CREATE TABLE IF NOT EXISTS scheduled_posts (
            id UUID PRIMARY KEY,
            video_ref TEXT NOT NULL,
            platform TEXT NOT NULL,
            account_id BIGINT,
            scheduled_for TIMESTAMPTZ NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            metadata JSONB NOT NULL DEFAULT '{}'
        )",
        r"
        CREATE TABLE IF NOT EXISTS system_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        r"
        CREATE TABLE IF NOT EXISTS published_history (
            id UUID PRIMARY KEY,
            title TEXT NOT NULL,
            platform TEXT NOT NULL,
            url TEXT NOT NULL,
            account_id BIGINT,
            published_at TIMESTAMPTZ NOT NULL
        )",
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| ForgeError::Database(e.to_string()))?;
    }
    Ok(())
}
