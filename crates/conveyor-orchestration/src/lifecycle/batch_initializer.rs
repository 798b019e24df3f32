//! # Batch Initializer
//!
//! Owns batch creation and the operator actions (step retry, batch
//! cancellation).
//!
//! Seeding happens in a single transaction: batch shell in `INITIALIZING`,
//! every item row, every first-step state row, then the flip to `PENDING`.
//! The flip is what the relay announces, so it must come last — a batch
//! visible to the dispatcher before its rows exist would be an empty house.

use sqlx::PgPool;
use tracing::{info, instrument};
use uuid::Uuid;

use conveyor_shared::events::{EventRelay, RelayEvent};
use conveyor_shared::models::{Batch, BatchItem, StepState};
use conveyor_shared::{ConveyorError, ConveyorResult};

use crate::resolver::{PipelineResolver, PipelineSource};

/// Input for batch creation: one client, one workstream, the raw records
#[derive(Debug, Clone, serde::Deserialize)]
pub struct BatchSeedRequest {
    pub client_id: Uuid,
    pub workstream: String,
    pub items: Vec<serde_json::Value>,
}

/// What seeding produced
#[derive(Debug, Clone, serde::Serialize)]
pub struct SeededBatch {
    pub batch_id: Uuid,
    pub blueprint: Vec<String>,
    pub pipeline_source: PipelineSource,
    pub item_count: usize,
}

#[derive(Debug, Clone)]
pub struct BatchInitializer {
    pool: PgPool,
    resolver: PipelineResolver,
    relay: EventRelay,
}

impl BatchInitializer {
    pub fn new(pool: PgPool, relay: EventRelay) -> Self {
        let resolver = PipelineResolver::new(pool.clone());
        Self {
            pool,
            resolver,
            relay,
        }
    }

    /// Create and seed a batch. Pipeline resolution failure surfaces before
    /// any row is written.
    #[instrument(skip(self, request), fields(client_id = %request.client_id, workstream = %request.workstream))]
    pub async fn seed(&self, request: BatchSeedRequest) -> ConveyorResult<SeededBatch> {
        if request.items.is_empty() {
            return Err(ConveyorError::Validation(
                "batch must contain at least one item".to_string(),
            ));
        }

        let resolved = self
            .resolver
            .resolve(&request.workstream, Some(request.client_id))
            .await?;

        let first_step = resolved
            .steps
            .first()
            .cloned()
            .ok_or_else(|| ConveyorError::Validation("resolved blueprint is empty".to_string()))?;

        let mut tx = self.pool.begin().await?;

        let batch = Batch::insert_initializing(
            &mut tx,
            request.client_id,
            &request.workstream,
            &resolved.steps,
        )
        .await?;

        for payload in &request.items {
            let item = BatchItem::insert(&mut tx, batch.id, payload).await?;
            sqlx::query(
                r#"
                INSERT INTO step_states (batch_id, item_id, step_name, status)
                VALUES ($1, $2, $3, 'PENDING')
                "#,
            )
            .bind(batch.id)
            .bind(item.id)
            .bind(&first_step)
            .execute(&mut *tx)
            .await?;
        }

        Batch::mark_seeded(&mut tx, batch.id).await?;
        tx.commit().await?;

        info!(
            batch_id = %batch.id,
            item_count = request.items.len(),
            blueprint = ?resolved.steps,
            source = ?resolved.source,
            "Batch seeded"
        );

        self.relay
            .publish(RelayEvent::BatchSeeded { batch_id: batch.id });

        Ok(SeededBatch {
            batch_id: batch.id,
            blueprint: resolved.steps,
            pipeline_source: resolved.source,
            item_count: request.items.len(),
        })
    }

    /// Operator retry of a FAILED step state: reset to PENDING so the next
    /// dispatcher tick picks it up again.
    #[instrument(skip(self))]
    pub async fn retry_step(&self, step_state_id: Uuid) -> ConveyorResult<bool> {
        let state = StepState::find_by_id(&self.pool, step_state_id)
            .await?
            .ok_or_else(|| ConveyorError::not_found("step state", step_state_id))?;

        let reset = StepState::retry(&self.pool, step_state_id).await?;
        if reset {
            info!(
                step_state_id = %step_state_id,
                batch_id = %state.batch_id,
                step_name = %state.step_name,
                "Step state reset for retry"
            );
            // The batch may already have been finalized as FAILED; reopen it.
            Batch::transition(
                &self.pool,
                state.batch_id,
                &[conveyor_shared::types::BatchStatus::Failed],
                conveyor_shared::types::BatchStatus::InProgress,
            )
            .await?;
            self.relay.publish(RelayEvent::StepsReady {
                batch_id: state.batch_id,
            });
        }
        Ok(reset)
    }

    /// Cancel a batch: explicit status, audit history preserved. In-flight
    /// step states drain on their own; the dispatcher and sequencer stop
    /// picking up the batch.
    #[instrument(skip(self))]
    pub async fn cancel_batch(&self, batch_id: Uuid) -> ConveyorResult<bool> {
        Batch::find_by_id(&self.pool, batch_id)
            .await?
            .ok_or_else(|| ConveyorError::not_found("batch", batch_id))?;

        let cancelled = Batch::cancel(&self.pool, batch_id).await?;
        if cancelled {
            info!(batch_id = %batch_id, "Batch cancelled");
        }
        Ok(cancelled)
    }
}
