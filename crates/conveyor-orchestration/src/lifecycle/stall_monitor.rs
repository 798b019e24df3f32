//! # Stall Monitor
//!
//! Returns step states stuck in a claimed or running status to PENDING after
//! a configurable age. QUEUED stalls come from a dispatcher that died between
//! claim and hand-off; IN_PROGRESS stalls come from an external callback that
//! never arrived. Requeueing relies on receiver idempotence: if the original
//! work eventually lands, its terminal write wins and a duplicate dispatch is
//! a no-op.

use sqlx::PgPool;
use tracing::{info, instrument, warn};

use conveyor_shared::config::StallConfig;
use conveyor_shared::models::StepState;
use conveyor_shared::types::StepStatus;
use conveyor_shared::ConveyorResult;

/// Outcome summary of one stall sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StallStats {
    pub requeued_queued: usize,
    pub requeued_in_progress: usize,
}

impl StallStats {
    pub fn total(&self) -> usize {
        self.requeued_queued + self.requeued_in_progress
    }
}

#[derive(Debug, Clone)]
pub struct StallMonitor {
    pool: PgPool,
    config: StallConfig,
}

impl StallMonitor {
    pub fn new(pool: PgPool, config: StallConfig) -> Self {
        Self { pool, config }
    }

    /// One sweep over both stall classes. A zero threshold disables that
    /// class; `enabled = false` disables the sweep entirely.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> ConveyorResult<StallStats> {
        if !self.config.enabled {
            return Ok(StallStats::default());
        }

        let mut stats = StallStats::default();

        if self.config.queued_requeue_after_secs > 0 {
            let ids = StepState::requeue_stalled(
                &self.pool,
                StepStatus::Queued,
                self.config.queued_requeue_after_secs,
            )
            .await?;
            stats.requeued_queued = ids.len();
            for id in &ids {
                warn!(
                    step_state_id = %id,
                    threshold_secs = self.config.queued_requeue_after_secs,
                    "Requeued step state stalled in QUEUED"
                );
            }
        }

        if self.config.in_progress_requeue_after_secs > 0 {
            let ids = StepState::requeue_stalled(
                &self.pool,
                StepStatus::InProgress,
                self.config.in_progress_requeue_after_secs,
            )
            .await?;
            stats.requeued_in_progress = ids.len();
            for id in &ids {
                warn!(
                    step_state_id = %id,
                    threshold_secs = self.config.in_progress_requeue_after_secs,
                    "Requeued step state stalled in IN_PROGRESS"
                );
            }
        }

        if stats.total() > 0 {
            info!(
                requeued_queued = stats.requeued_queued,
                requeued_in_progress = stats.requeued_in_progress,
                "Stall sweep requeued stuck step states"
            );
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_total_sums_both_classes() {
        let stats = StallStats {
            requeued_queued: 2,
            requeued_in_progress: 3,
        };
        assert_eq!(stats.total(), 5);
        assert_eq!(StallStats::default().total(), 0);
    }
}
