//! Step registry: administrator-managed static step descriptions, read-only
//! to the orchestration machine. Slugs are unique per workstream, not
//! globally.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::errors::ConveyorResult;
use crate::types::ExecutionMode;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StepRegistryEntry {
    pub workstream: String,
    pub slug: String,
    pub display_name: String,
    pub mode: ExecutionMode,
    pub sender_fn: String,
    pub receiver_fn: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StepRegistryEntry {
    pub async fn upsert(
        pool: &PgPool,
        workstream: &str,
        slug: &str,
        display_name: &str,
        mode: ExecutionMode,
        sender_fn: &str,
        receiver_fn: Option<&str>,
    ) -> ConveyorResult<Self> {
        let entry = sqlx::query_as::<_, StepRegistryEntry>(
            r#"
            INSERT INTO step_registry (workstream, slug, display_name, mode, sender_fn, receiver_fn)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (workstream, slug) DO UPDATE
            SET display_name = EXCLUDED.display_name,
                mode = EXCLUDED.mode,
                sender_fn = EXCLUDED.sender_fn,
                receiver_fn = EXCLUDED.receiver_fn
            RETURNING workstream, slug, display_name, mode, sender_fn, receiver_fn, created_at
            "#,
        )
        .bind(workstream)
        .bind(slug)
        .bind(display_name)
        .bind(mode)
        .bind(sender_fn)
        .bind(receiver_fn)
        .fetch_one(pool)
        .await?;
        Ok(entry)
    }

    pub async fn find(
        pool: &PgPool,
        workstream: &str,
        slug: &str,
    ) -> ConveyorResult<Option<Self>> {
        let entry = sqlx::query_as::<_, StepRegistryEntry>(
            r#"
            SELECT workstream, slug, display_name, mode, sender_fn, receiver_fn, created_at
            FROM step_registry
            WHERE workstream = $1 AND slug = $2
            "#,
        )
        .bind(workstream)
        .bind(slug)
        .fetch_optional(pool)
        .await?;
        Ok(entry)
    }

    pub async fn for_workstream(pool: &PgPool, workstream: &str) -> ConveyorResult<Vec<Self>> {
        let entries = sqlx::query_as::<_, StepRegistryEntry>(
            r#"
            SELECT workstream, slug, display_name, mode, sender_fn, receiver_fn, created_at
            FROM step_registry
            WHERE workstream = $1
            ORDER BY slug
            "#,
        )
        .bind(workstream)
        .fetch_all(pool)
        .await?;
        Ok(entries)
    }
}
