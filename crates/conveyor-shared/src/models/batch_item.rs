//! Batch items: one opaque input record per row. Created at seed time, never
//! mutated, removed only by batch deletion (cascade).

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::errors::ConveyorResult;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BatchItem {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl BatchItem {
    /// Insert one item inside the batch seeding transaction
    pub async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        batch_id: Uuid,
        payload: &serde_json::Value,
    ) -> ConveyorResult<Self> {
        let item = sqlx::query_as::<_, BatchItem>(
            r#"
            INSERT INTO batch_items (batch_id, payload)
            VALUES ($1, $2)
            RETURNING id, batch_id, payload, created_at
            "#,
        )
        .bind(batch_id)
        .bind(payload)
        .fetch_one(&mut **tx)
        .await?;
        Ok(item)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> ConveyorResult<Option<Self>> {
        let item = sqlx::query_as::<_, BatchItem>(
            "SELECT id, batch_id, payload, created_at FROM batch_items WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(item)
    }

    pub async fn count_for_batch(pool: &PgPool, batch_id: Uuid) -> ConveyorResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM batch_items WHERE batch_id = $1")
            .bind(batch_id)
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}
