//! # Dispatcher
//!
//! Stateless control loop that finds PENDING step states and starts their
//! compute work without waiting for completion. Any number of dispatcher
//! invocations may run concurrently: the atomic `PENDING -> QUEUED` claim in
//! [`StepState::claim_dispatchable`] guarantees each row is started by at
//! most one of them, and rows another run already claimed are silently
//! skipped.
//!
//! A failure of the invocation call itself (as opposed to the work failing)
//! reverts the row to PENDING for a later tick — the one sanctioned backward
//! transition in an otherwise forward-only machine.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::{debug, error, info, instrument, warn};

use conveyor_shared::compute::{ComputeBackend, ComputeRequest};
use conveyor_shared::config::DispatcherConfig;
use conveyor_shared::models::{DispatchableStep, StepState};
use conveyor_shared::types::ExecutionMode;
use conveyor_shared::ConveyorResult;

/// Outcome summary of one dispatcher invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Rows this invocation claimed
    pub claimed: usize,
    /// Rows handed to the compute backend
    pub dispatched: usize,
    /// Rows reverted to PENDING after a dispatch error
    pub reverted: usize,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    pool: PgPool,
    backend: Arc<dyn ComputeBackend>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(pool: PgPool, backend: Arc<dyn ComputeBackend>, config: DispatcherConfig) -> Self {
        Self {
            pool,
            backend,
            config,
        }
    }

    /// One dispatcher pass: claim, then fan out. Never blocks on ASYNC work;
    /// SYNC work is awaited inline only when `wait_for_sync` is set.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> ConveyorResult<DispatchStats> {
        let claimed = StepState::claim_dispatchable(&self.pool, self.config.batch_size).await?;

        if claimed.is_empty() {
            return Ok(DispatchStats::default());
        }

        let mut stats = DispatchStats {
            claimed: claimed.len(),
            ..Default::default()
        };

        debug!(claimed = stats.claimed, "Dispatcher claimed step states");

        for step in claimed {
            match self.dispatch_one(&step).await {
                Ok(()) => stats.dispatched += 1,
                Err(e) => {
                    error!(
                        step_state_id = %step.id,
                        step_name = %step.step_name,
                        error = %e,
                        "Dispatch failed, reverting to PENDING"
                    );
                    if StepState::release_to_pending(&self.pool, step.id).await? {
                        stats.reverted += 1;
                    } else {
                        // The worker raced us to a terminal write; leave it.
                        warn!(
                            step_state_id = %step.id,
                            "Claimed row changed state before revert, leaving as is"
                        );
                    }
                }
            }
        }

        if stats.dispatched > 0 {
            info!(
                claimed = stats.claimed,
                dispatched = stats.dispatched,
                reverted = stats.reverted,
                "Dispatcher pass complete"
            );
        }

        Ok(stats)
    }

    async fn dispatch_one(&self, step: &DispatchableStep) -> ConveyorResult<()> {
        let request = ComputeRequest {
            step_state_id: step.id,
            batch_id: step.batch_id,
            item_id: step.item_id,
            step_name: step.step_name.clone(),
            workstream: step.workstream.clone(),
            client_id: step.client_id,
            mode: step.mode,
            sender_fn: step.sender_fn.clone(),
        };

        debug!(
            step_state_id = %step.id,
            step_name = %step.step_name,
            mode = %step.mode,
            sender_fn = %step.sender_fn,
            "Dispatching step"
        );

        if self.config.wait_for_sync && step.mode == ExecutionMode::Sync {
            self.backend.spawn_and_wait(request).await
        } else {
            self.backend.spawn(request).await
        }
    }
}
