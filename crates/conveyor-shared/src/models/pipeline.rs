//! # Pipeline Definitions
//!
//! Named, ordered step lists per workstream: either a workstream default
//! (`client_id` null) or a client override. Within one (workstream,
//! client-or-null) scope at most one pipeline is active; the invariant is
//! enforced by [`Pipeline::activate`] as a single transaction that
//! deactivates every sibling before activating the target. A failure between
//! the two writes leaves the scope with zero active pipelines, which is the
//! safe direction.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{ConveyorError, ConveyorResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Pipeline {
    pub id: Uuid,
    pub client_id: Option<Uuid>,
    pub workstream: String,
    pub name: String,
    pub description: Option<String>,
    pub steps: Json<Vec<String>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPipeline {
    pub client_id: Option<Uuid>,
    pub workstream: String,
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<String>,
}

impl Pipeline {
    pub async fn create(pool: &PgPool, new: NewPipeline) -> ConveyorResult<Self> {
        if new.steps.is_empty() {
            return Err(ConveyorError::Validation(
                "pipeline must contain at least one step".to_string(),
            ));
        }

        let pipeline = sqlx::query_as::<_, Pipeline>(
            r#"
            INSERT INTO pipelines (client_id, workstream, name, description, steps)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, client_id, workstream, name, description, steps,
                      is_active, created_at, updated_at
            "#,
        )
        .bind(new.client_id)
        .bind(&new.workstream)
        .bind(&new.name)
        .bind(new.description.as_deref())
        .bind(Json(new.steps))
        .fetch_one(pool)
        .await?;
        Ok(pipeline)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> ConveyorResult<Option<Self>> {
        let pipeline = sqlx::query_as::<_, Pipeline>(
            r#"
            SELECT id, client_id, workstream, name, description, steps,
                   is_active, created_at, updated_at
            FROM pipelines
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(pipeline)
    }

    /// Fetch the active pipeline for one (workstream, client-or-null) scope.
    ///
    /// Returns the most recently updated one if the invariant has been
    /// violated out-of-band, so a corrupted scope degrades deterministically.
    pub async fn find_active(
        pool: &PgPool,
        workstream: &str,
        client_id: Option<Uuid>,
    ) -> ConveyorResult<Option<Self>> {
        let pipeline = sqlx::query_as::<_, Pipeline>(
            r#"
            SELECT id, client_id, workstream, name, description, steps,
                   is_active, created_at, updated_at
            FROM pipelines
            WHERE workstream = $1
              AND client_id IS NOT DISTINCT FROM $2
              AND is_active
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(workstream)
        .bind(client_id)
        .fetch_optional(pool)
        .await?;
        Ok(pipeline)
    }

    /// Activate this pipeline, deactivating every sibling in the same scope
    /// in the same transaction.
    pub async fn activate(pool: &PgPool, id: Uuid) -> ConveyorResult<Self> {
        let mut tx = pool.begin().await?;

        let target = sqlx::query_as::<_, Pipeline>(
            r#"
            SELECT id, client_id, workstream, name, description, steps,
                   is_active, created_at, updated_at
            FROM pipelines
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ConveyorError::not_found("pipeline", id))?;

        sqlx::query(
            r#"
            UPDATE pipelines
            SET is_active = false, updated_at = now()
            WHERE workstream = $1
              AND client_id IS NOT DISTINCT FROM $2
              AND is_active
              AND id <> $3
            "#,
        )
        .bind(&target.workstream)
        .bind(target.client_id)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let activated = sqlx::query_as::<_, Pipeline>(
            r#"
            UPDATE pipelines
            SET is_active = true, updated_at = now()
            WHERE id = $1
            RETURNING id, client_id, workstream, name, description, steps,
                      is_active, created_at, updated_at
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(activated)
    }

    /// Deactivate without activating anything else; the scope may legally be
    /// left with no active pipeline.
    pub async fn deactivate(pool: &PgPool, id: Uuid) -> ConveyorResult<bool> {
        let result = sqlx::query(
            "UPDATE pipelines SET is_active = false, updated_at = now() WHERE id = $1 AND is_active",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the step list. Does not touch any batch: blueprints are frozen
    /// copies taken at batch creation.
    pub async fn update_steps(pool: &PgPool, id: Uuid, steps: Vec<String>) -> ConveyorResult<bool> {
        if steps.is_empty() {
            return Err(ConveyorError::Validation(
                "pipeline must contain at least one step".to_string(),
            ));
        }
        let result =
            sqlx::query("UPDATE pipelines SET steps = $2, updated_at = now() WHERE id = $1")
                .bind(id)
                .bind(Json(steps))
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> ConveyorResult<bool> {
        let result = sqlx::query("DELETE FROM pipelines WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count of active pipelines in one scope (invariant check helper)
    pub async fn active_count(
        pool: &PgPool,
        workstream: &str,
        client_id: Option<Uuid>,
    ) -> ConveyorResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT count(*) FROM pipelines
            WHERE workstream = $1
              AND client_id IS NOT DISTINCT FROM $2
              AND is_active
            "#,
        )
        .bind(workstream)
        .bind(client_id)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    pub fn step_names(&self) -> &[String] {
        &self.steps.0
    }
}
