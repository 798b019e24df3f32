//! # Batches
//!
//! One enrichment run over a set of input records. The `blueprint` column is
//! the frozen copy of the resolved pipeline; batch status is a derived
//! aggregate over its items' step states, maintained by the finalizer as a
//! housekeeping layer.
//!
//! Batches are inserted in `INITIALIZING` and flipped to `PENDING` only once
//! every item row and first-step state row exists. Flipping earlier would let
//! a dispatcher observe a batch with no work in it.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::errors::ConveyorResult;
use crate::types::BatchStatus;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Batch {
    pub id: Uuid,
    pub client_id: Uuid,
    pub workstream: String,
    pub status: BatchStatus,
    pub blueprint: Json<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

/// Per-item outcome counts used to derive the aggregate batch status
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct BatchOutcomeCounts {
    pub total_items: i64,
    pub failed_items: i64,
    pub finished_items: i64,
    pub started_states: i64,
}

/// One row of the per-step progress summary
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BatchProgressRow {
    pub step_name: String,
    pub status: crate::types::StepStatus,
    pub count: i64,
}

impl Batch {
    /// Insert a batch shell inside a seeding transaction. The caller seeds
    /// items and first-step states before flipping to `PENDING`.
    pub async fn insert_initializing(
        tx: &mut Transaction<'_, Postgres>,
        client_id: Uuid,
        workstream: &str,
        blueprint: &[String],
    ) -> ConveyorResult<Self> {
        let batch = sqlx::query_as::<_, Batch>(
            r#"
            INSERT INTO batches (client_id, workstream, status, blueprint)
            VALUES ($1, $2, 'INITIALIZING', $3)
            RETURNING id, client_id, workstream, status, blueprint, created_at
            "#,
        )
        .bind(client_id)
        .bind(workstream)
        .bind(Json(blueprint.to_vec()))
        .fetch_one(&mut **tx)
        .await?;
        Ok(batch)
    }

    /// Flip `INITIALIZING -> PENDING` once seeding is complete
    pub async fn mark_seeded(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> ConveyorResult<bool> {
        let result = sqlx::query(
            "UPDATE batches SET status = 'PENDING' WHERE id = $1 AND status = 'INITIALIZING'",
        )
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> ConveyorResult<Option<Self>> {
        let batch = sqlx::query_as::<_, Batch>(
            r#"
            SELECT id, client_id, workstream, status, blueprint, created_at
            FROM batches
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(batch)
    }

    /// Conditional forward-only status transition. Returns false when the
    /// batch was not in the expected source set (another invocation got
    /// there first, or the batch is terminal).
    pub async fn transition(
        pool: &PgPool,
        id: Uuid,
        from: &[BatchStatus],
        to: BatchStatus,
    ) -> ConveyorResult<bool> {
        let from_strs: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
        let result = sqlx::query(
            r#"
            UPDATE batches
            SET status = $2
            WHERE id = $1 AND status::text = ANY($3)
            "#,
        )
        .bind(id)
        .bind(to)
        .bind(&from_strs)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Explicit cancellation: status flip only, audit history preserved.
    /// In-flight step states are left to drain; the dispatcher stops
    /// claiming rows for cancelled batches.
    pub async fn cancel(pool: &PgPool, id: Uuid) -> ConveyorResult<bool> {
        Self::transition(
            pool,
            id,
            &[
                BatchStatus::Initializing,
                BatchStatus::Pending,
                BatchStatus::InProgress,
            ],
            BatchStatus::Cancelled,
        )
        .await
    }

    /// Per-item outcome counts for aggregate derivation.
    ///
    /// An item is *failed* when any of its step states is FAILED, *finished*
    /// when the last blueprint step is COMPLETED. `started_states` counts
    /// step states that have left PENDING, marking dispatch activity.
    pub async fn outcome_counts(pool: &PgPool, id: Uuid) -> ConveyorResult<BatchOutcomeCounts> {
        let counts = sqlx::query_as::<_, BatchOutcomeCounts>(
            r#"
            SELECT
                count(*)                                            AS total_items,
                count(*) FILTER (WHERE per_item.failed)             AS failed_items,
                count(*) FILTER (WHERE per_item.finished
                                   AND NOT per_item.failed)         AS finished_items,
                COALESCE(sum(per_item.started), 0)::bigint          AS started_states
            FROM (
                SELECT
                    i.id,
                    bool_or(ss.status = 'FAILED')                   AS failed,
                    bool_or(ss.step_name = b.blueprint ->> -1
                              AND ss.status = 'COMPLETED')          AS finished,
                    count(ss.id) FILTER (WHERE ss.status <> 'PENDING') AS started
                FROM batch_items i
                JOIN batches b ON b.id = i.batch_id
                LEFT JOIN step_states ss ON ss.item_id = i.id
                WHERE i.batch_id = $1
                GROUP BY i.id
            ) per_item
            "#,
        )
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(counts)
    }

    /// Step-by-step status breakdown for operator visibility
    pub async fn progress(pool: &PgPool, id: Uuid) -> ConveyorResult<Vec<BatchProgressRow>> {
        let rows = sqlx::query_as::<_, BatchProgressRow>(
            r#"
            SELECT step_name, status, count(*) AS count
            FROM step_states
            WHERE batch_id = $1
            GROUP BY step_name, status
            ORDER BY step_name, status
            "#,
        )
        .bind(id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub fn step_names(&self) -> &[String] {
        &self.blueprint.0
    }
}
