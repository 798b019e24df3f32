//! # Step States
//!
//! The unit the orchestration machine schedules: one item's progress through
//! one pipeline step. All coordination between concurrent dispatcher and
//! sequencer invocations is expressed here as conditional updates, so every
//! method returns whether *this* caller performed the transition.
//!
//! The `(batch_id, item_id, step_name)` uniqueness constraint is the backstop
//! that collapses racing successor creations into a single row.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::ConveyorResult;
use crate::types::{ExecutionMode, StepStatus};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StepState {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub item_id: Uuid,
    pub step_name: String,
    pub status: StepStatus,
    pub updated_at: DateTime<Utc>,
    pub advanced_at: Option<DateTime<Utc>>,
    pub meta: Option<serde_json::Value>,
}

/// A claimed row joined with everything the dispatcher needs to start it
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DispatchableStep {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub item_id: Uuid,
    pub step_name: String,
    pub client_id: Uuid,
    pub workstream: String,
    pub mode: ExecutionMode,
    pub sender_fn: String,
}

/// Terminal outcome applied by workers and receivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepOutcome {
    Completed,
    Failed,
}

impl StepOutcome {
    pub fn as_status(&self) -> StepStatus {
        match self {
            Self::Completed => StepStatus::Completed,
            Self::Failed => StepStatus::Failed,
        }
    }
}

impl StepState {
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> ConveyorResult<Option<Self>> {
        let state = sqlx::query_as::<_, StepState>(
            r#"
            SELECT id, batch_id, item_id, step_name, status, updated_at, advanced_at, meta
            FROM step_states
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(state)
    }

    pub async fn find_by_tuple(
        pool: &PgPool,
        batch_id: Uuid,
        item_id: Uuid,
        step_name: &str,
    ) -> ConveyorResult<Option<Self>> {
        let state = sqlx::query_as::<_, StepState>(
            r#"
            SELECT id, batch_id, item_id, step_name, status, updated_at, advanced_at, meta
            FROM step_states
            WHERE batch_id = $1 AND item_id = $2 AND step_name = $3
            "#,
        )
        .bind(batch_id)
        .bind(item_id)
        .bind(step_name)
        .fetch_optional(pool)
        .await?;
        Ok(state)
    }

    pub async fn for_batch(pool: &PgPool, batch_id: Uuid) -> ConveyorResult<Vec<Self>> {
        let states = sqlx::query_as::<_, StepState>(
            r#"
            SELECT id, batch_id, item_id, step_name, status, updated_at, advanced_at, meta
            FROM step_states
            WHERE batch_id = $1
            ORDER BY updated_at ASC
            "#,
        )
        .bind(batch_id)
        .fetch_all(pool)
        .await?;
        Ok(states)
    }

    /// Atomically claim up to `limit` dispatchable rows: `PENDING -> QUEUED`.
    ///
    /// Only rows whose step has a registry entry for the batch workstream are
    /// eligible, and only batches that are live (not INITIALIZING, not
    /// CANCELLED, not terminal) are considered. `FOR UPDATE SKIP LOCKED`
    /// keeps concurrent claimants from blocking each other; the redundant
    /// `status = 'PENDING'` guard on the outer update keeps the transition
    /// conditional even for rows claimed between the select and the update.
    /// The returned set contains exactly the rows this caller transitioned.
    pub async fn claim_dispatchable(
        pool: &PgPool,
        limit: i64,
    ) -> ConveyorResult<Vec<DispatchableStep>> {
        let claimed = sqlx::query_as::<_, DispatchableStep>(
            r#"
            WITH claimable AS (
                SELECT ss.id
                FROM step_states ss
                JOIN batches b ON b.id = ss.batch_id
                JOIN step_registry sr
                  ON sr.workstream = b.workstream AND sr.slug = ss.step_name
                WHERE ss.status = 'PENDING'
                  AND b.status IN ('PENDING', 'IN_PROGRESS')
                ORDER BY ss.updated_at ASC
                LIMIT $1
                FOR UPDATE OF ss SKIP LOCKED
            )
            UPDATE step_states ss
            SET status = 'QUEUED', updated_at = now()
            FROM claimable c, batches b, step_registry sr
            WHERE ss.id = c.id
              AND ss.status = 'PENDING'
              AND b.id = ss.batch_id
              AND sr.workstream = b.workstream
              AND sr.slug = ss.step_name
            RETURNING ss.id, ss.batch_id, ss.item_id, ss.step_name,
                      b.client_id, b.workstream, sr.mode, sr.sender_fn
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(claimed)
    }

    /// Revert a claimed row to `PENDING`. Used only when the dispatch call
    /// itself failed, or by the stall monitor.
    pub async fn release_to_pending(pool: &PgPool, id: Uuid) -> ConveyorResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE step_states
            SET status = 'PENDING', updated_at = now()
            WHERE id = $1 AND status = 'QUEUED'
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// ASYNC sender handoff: the row sits `IN_PROGRESS` until a receiver
    /// applies a terminal write.
    pub async fn mark_in_progress(
        pool: &PgPool,
        id: Uuid,
        meta: Option<&serde_json::Value>,
    ) -> ConveyorResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE step_states
            SET status = 'IN_PROGRESS',
                updated_at = now(),
                meta = COALESCE($2, meta)
            WHERE id = $1 AND status IN ('PENDING', 'QUEUED')
            "#,
        )
        .bind(id)
        .bind(meta)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Idempotent terminal write. Re-finishing an already-terminal row is a
    /// no-op (`Ok(false)`), not an error, because providers may deliver the
    /// same callback more than once.
    pub async fn finish(
        pool: &PgPool,
        id: Uuid,
        outcome: StepOutcome,
        meta: Option<&serde_json::Value>,
    ) -> ConveyorResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE step_states
            SET status = $2,
                updated_at = now(),
                meta = COALESCE($3, meta)
            WHERE id = $1 AND status NOT IN ('COMPLETED', 'FAILED')
            "#,
        )
        .bind(id)
        .bind(outcome.as_status())
        .bind(meta)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Operator-initiated retry: `FAILED -> PENDING`, the explicit exception
    /// to the forward-only rule.
    pub async fn retry(pool: &PgPool, id: Uuid) -> ConveyorResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE step_states
            SET status = 'PENDING', updated_at = now()
            WHERE id = $1 AND status = 'FAILED'
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Create-if-absent: ensure a `PENDING` state row exists for the tuple.
    /// Returns true when this call created the row. The uniqueness
    /// constraint absorbs racing sequencer runs.
    pub async fn ensure(
        pool: &PgPool,
        batch_id: Uuid,
        item_id: Uuid,
        step_name: &str,
    ) -> ConveyorResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO step_states (batch_id, item_id, step_name, status)
            VALUES ($1, $2, $3, 'PENDING')
            ON CONFLICT ON CONSTRAINT uq_step_state DO NOTHING
            "#,
        )
        .bind(batch_id)
        .bind(item_id)
        .bind(step_name)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Completed rows the sequencer has not yet advanced. Cancelled batches
    /// are excluded so their completed rows stop flowing.
    pub async fn fetch_advanceable(pool: &PgPool, limit: i64) -> ConveyorResult<Vec<Self>> {
        let states = sqlx::query_as::<_, StepState>(
            r#"
            SELECT ss.id, ss.batch_id, ss.item_id, ss.step_name, ss.status,
                   ss.updated_at, ss.advanced_at, ss.meta
            FROM step_states ss
            JOIN batches b ON b.id = ss.batch_id
            WHERE ss.status = 'COMPLETED'
              AND ss.advanced_at IS NULL
              AND b.status <> 'CANCELLED'
            ORDER BY ss.updated_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(states)
    }

    /// Set the advancement marker exactly once
    pub async fn mark_advanced(pool: &PgPool, id: Uuid) -> ConveyorResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE step_states
            SET advanced_at = now()
            WHERE id = $1 AND advanced_at IS NULL
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Requeue rows stuck in the given status for longer than `max_age_secs`,
    /// stamping a diagnostic note into `meta`. Returns the requeued ids.
    pub async fn requeue_stalled(
        pool: &PgPool,
        stuck_in: StepStatus,
        max_age_secs: u64,
    ) -> ConveyorResult<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE step_states
            SET status = 'PENDING',
                updated_at = now(),
                meta = COALESCE(meta, '{}'::jsonb)
                       || jsonb_build_object(
                            'stall_requeued_at', now()::text,
                            'stalled_in', $1::text)
            WHERE status = $1
              AND updated_at < now() - make_interval(secs => $2::double precision)
            RETURNING id
            "#,
        )
        .bind(stuck_in)
        .bind(max_age_secs as i64)
        .fetch_all(pool)
        .await?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_maps_to_terminal_status() {
        assert_eq!(StepOutcome::Completed.as_status(), StepStatus::Completed);
        assert_eq!(StepOutcome::Failed.as_status(), StepStatus::Failed);
        assert!(StepOutcome::Completed.as_status().is_terminal());
    }

    #[test]
    fn outcome_serde_wire_format() {
        assert_eq!(
            serde_json::to_string(&StepOutcome::Completed).unwrap(),
            "\"COMPLETED\""
        );
        let parsed: StepOutcome = serde_json::from_str("\"FAILED\"").unwrap();
        assert_eq!(parsed, StepOutcome::Failed);
    }
}
