//! # Batch Finalizer
//!
//! Maintains the derived aggregate batch status from per-item outcomes.
//! Housekeeping only: the per-item machine never waits on it.
//!
//! Rules: an item is *failed* when any of its step states is FAILED and
//! *finished* when the last blueprint step is COMPLETED. A batch becomes
//! COMPLETED when every item finished, FAILED when nothing is in flight and
//! at least one item failed, IN_PROGRESS as soon as any step state has left
//! PENDING. INITIALIZING and CANCELLED batches are never touched.

use sqlx::PgPool;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use conveyor_shared::models::{Batch, BatchOutcomeCounts};
use conveyor_shared::types::BatchStatus;
use conveyor_shared::ConveyorResult;

/// Pure aggregate derivation from per-item outcome counts.
/// Returns `None` when no transition is warranted yet.
pub fn derive_batch_status(counts: &BatchOutcomeCounts) -> Option<BatchStatus> {
    if counts.total_items == 0 {
        return None;
    }
    let terminal = counts.failed_items + counts.finished_items;
    if counts.finished_items == counts.total_items {
        Some(BatchStatus::Completed)
    } else if terminal == counts.total_items {
        Some(BatchStatus::Failed)
    } else if counts.started_states > 0 {
        Some(BatchStatus::InProgress)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct BatchFinalizer {
    pool: PgPool,
}

impl BatchFinalizer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Re-derive aggregate status for every live batch
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> ConveyorResult<usize> {
        let live: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM batches WHERE status IN ('PENDING', 'IN_PROGRESS')",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut transitions = 0;
        for batch_id in live {
            if self.finalize_batch(batch_id).await? {
                transitions += 1;
            }
        }
        Ok(transitions)
    }

    /// Re-derive one batch's aggregate status. Returns whether a transition
    /// happened. Conditional forward-only updates make concurrent finalizer
    /// runs harmless.
    pub async fn finalize_batch(&self, batch_id: Uuid) -> ConveyorResult<bool> {
        let counts = Batch::outcome_counts(&self.pool, batch_id).await?;

        let Some(target) = derive_batch_status(&counts) else {
            return Ok(false);
        };

        let from: &[BatchStatus] = match target {
            BatchStatus::InProgress => &[BatchStatus::Pending],
            BatchStatus::Completed | BatchStatus::Failed => {
                &[BatchStatus::Pending, BatchStatus::InProgress]
            }
            _ => return Ok(false),
        };

        let transitioned = Batch::transition(&self.pool, batch_id, from, target).await?;
        if transitioned {
            if target.is_terminal() {
                info!(
                    batch_id = %batch_id,
                    status = %target,
                    finished_items = counts.finished_items,
                    failed_items = counts.failed_items,
                    total_items = counts.total_items,
                    "Batch reached terminal status"
                );
            } else {
                debug!(batch_id = %batch_id, status = %target, "Batch status updated");
            }
        }
        Ok(transitioned)
    }
}
