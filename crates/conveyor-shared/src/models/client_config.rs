//! Per-client worker configuration (webhook URLs, provider settings),
//! keyed by (client, workstream, step slug). Read by compute workers; the
//! orchestration machine never touches it.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::ConveyorResult;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClientStepConfig {
    pub id: Uuid,
    pub client_id: Uuid,
    pub workstream: String,
    pub slug: String,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClientStepConfig {
    pub async fn upsert(
        pool: &PgPool,
        client_id: Uuid,
        workstream: &str,
        slug: &str,
        config: &serde_json::Value,
    ) -> ConveyorResult<Self> {
        let row = sqlx::query_as::<_, ClientStepConfig>(
            r#"
            INSERT INTO client_step_configs (client_id, workstream, slug, config)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT ON CONSTRAINT uq_client_step_config DO UPDATE
            SET config = EXCLUDED.config, updated_at = now()
            RETURNING id, client_id, workstream, slug, config, created_at, updated_at
            "#,
        )
        .bind(client_id)
        .bind(workstream)
        .bind(slug)
        .bind(config)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    pub async fn find(
        pool: &PgPool,
        client_id: Uuid,
        workstream: &str,
        slug: &str,
    ) -> ConveyorResult<Option<Self>> {
        let row = sqlx::query_as::<_, ClientStepConfig>(
            r#"
            SELECT id, client_id, workstream, slug, config, created_at, updated_at
            FROM client_step_configs
            WHERE client_id = $1 AND workstream = $2 AND slug = $3
            "#,
        )
        .bind(client_id)
        .bind(workstream)
        .bind(slug)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }
}
