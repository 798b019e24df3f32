//! Step results: generic result storage keyed by (batch, item, step).
//! Recording is an upsert so receivers can re-deliver the same result without
//! error.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::ConveyorResult;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StepResult {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub item_id: Uuid,
    pub step_name: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl StepResult {
    pub async fn record(
        pool: &PgPool,
        batch_id: Uuid,
        item_id: Uuid,
        step_name: &str,
        data: &serde_json::Value,
    ) -> ConveyorResult<Self> {
        let result = sqlx::query_as::<_, StepResult>(
            r#"
            INSERT INTO step_results (batch_id, item_id, step_name, data)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT ON CONSTRAINT uq_step_result DO UPDATE
            SET data = EXCLUDED.data
            RETURNING id, batch_id, item_id, step_name, data, created_at
            "#,
        )
        .bind(batch_id)
        .bind(item_id)
        .bind(step_name)
        .bind(data)
        .fetch_one(pool)
        .await?;
        Ok(result)
    }

    pub async fn find(
        pool: &PgPool,
        batch_id: Uuid,
        item_id: Uuid,
        step_name: &str,
    ) -> ConveyorResult<Option<Self>> {
        let result = sqlx::query_as::<_, StepResult>(
            r#"
            SELECT id, batch_id, item_id, step_name, data, created_at
            FROM step_results
            WHERE batch_id = $1 AND item_id = $2 AND step_name = $3
            "#,
        )
        .bind(batch_id)
        .bind(item_id)
        .bind(step_name)
        .fetch_optional(pool)
        .await?;
        Ok(result)
    }
}
