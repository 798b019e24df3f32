//! # Worker Registry and In-Process Backend
//!
//! Maps registry-declared `sender_fn` names to [`StepWorker`] implementations
//! and runs them as a [`ComputeBackend`].
//!
//! An unregistered `sender_fn` fails the `spawn` call itself, so the
//! dispatcher reverts the row to PENDING instead of stranding it. Once a
//! worker is running, its failures never propagate back: they become a
//! FAILED terminal write on the row.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use conveyor_shared::compute::{ComputeBackend, ComputeRequest};
use conveyor_shared::events::{EventRelay, RelayEvent};
use conveyor_shared::models::{StepOutcome, StepResult, StepState};
use conveyor_shared::{ConveyorError, ConveyorResult};

use crate::context::WorkerContext;

/// What a worker run produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// SYNC work finished; the output is recorded and the row completed
    Completed(serde_json::Value),
    /// ASYNC handoff succeeded; the row sits IN_PROGRESS until a callback
    /// arrives. `meta` is stamped onto the row for diagnostics.
    HandedOff { meta: Option<serde_json::Value> },
}

/// One compute worker, keyed by the registry's `sender_fn` name.
///
/// Returning `Err` records a FAILED terminal write on the step state; it
/// never propagates to the dispatcher. Panics are contained the same way,
/// with the panic message in the row's `meta`.
#[async_trait]
pub trait StepWorker: Send + Sync + std::fmt::Debug {
    /// The `sender_fn` name this worker answers to
    fn name(&self) -> &str;

    async fn run(&self, ctx: &WorkerContext) -> ConveyorResult<WorkOutcome>;
}

/// [`ComputeBackend`] running registered workers on the local tokio runtime
#[derive(Debug)]
pub struct InProcessBackend {
    pool: PgPool,
    relay: EventRelay,
    workers: HashMap<String, Arc<dyn StepWorker>>,
}

impl InProcessBackend {
    pub fn new(pool: PgPool, relay: EventRelay) -> Self {
        Self {
            pool,
            relay,
            workers: HashMap::new(),
        }
    }

    pub fn register(mut self, worker: Arc<dyn StepWorker>) -> Self {
        let name = worker.name().to_string();
        info!(sender_fn = %name, "Registered step worker");
        self.workers.insert(name, worker);
        self
    }

    pub fn worker_names(&self) -> Vec<&str> {
        self.workers.keys().map(String::as_str).collect()
    }

    fn lookup(&self, request: &ComputeRequest) -> ConveyorResult<Arc<dyn StepWorker>> {
        self.workers.get(&request.sender_fn).cloned().ok_or_else(|| {
            ConveyorError::Dispatch {
                step_name: request.step_name.clone(),
                reason: format!("no worker registered for sender_fn '{}'", request.sender_fn),
            }
        })
    }

    /// Run one claimed step to its next state. All outcomes — success,
    /// handoff, worker error — end as row writes; this function only errors
    /// when the state store itself is unreachable, and even that is swallowed
    /// by the spawned-task path.
    async fn execute(
        pool: PgPool,
        relay: EventRelay,
        worker: Arc<dyn StepWorker>,
        request: ComputeRequest,
    ) -> ConveyorResult<()> {
        let ctx = WorkerContext::new(pool.clone(), request.clone());

        if !StepState::mark_in_progress(&pool, request.step_state_id, None).await? {
            // Already moved on (stall requeue or duplicate spawn); do nothing
            warn!(
                step_state_id = %request.step_state_id,
                "Step state no longer claimable, skipping run"
            );
            return Ok(());
        }

        debug!(
            step_state_id = %request.step_state_id,
            step_name = %request.step_name,
            sender_fn = %request.sender_fn,
            "Running step worker"
        );

        // Run on a task of its own so a panicking worker surfaces as a
        // JoinError here instead of leaving the row IN_PROGRESS forever.
        let run = tokio::spawn(async move { worker.run(&ctx).await });
        let outcome = match run.await {
            Ok(outcome) => outcome,
            Err(join_err) => {
                let reason = match join_err.try_into_panic() {
                    Ok(payload) => {
                        format!("worker panicked: {}", panic_message(payload.as_ref()))
                    }
                    Err(e) => format!("worker task aborted: {e}"),
                };
                Err(ConveyorError::Worker(reason))
            }
        };

        match outcome {
            Ok(WorkOutcome::Completed(data)) => {
                StepResult::record(&pool, request.batch_id, request.item_id, &request.step_name, &data)
                    .await?;
                let applied =
                    StepState::finish(&pool, request.step_state_id, StepOutcome::Completed, None)
                        .await?;
                if applied {
                    relay.publish(RelayEvent::StepCompleted {
                        batch_id: request.batch_id,
                        step_state_id: request.step_state_id,
                    });
                }
                Ok(())
            }
            Ok(WorkOutcome::HandedOff { meta }) => {
                if let Some(meta) = meta {
                    sqlx::query(
                        "UPDATE step_states SET meta = COALESCE(meta, '{}'::jsonb) || $2 WHERE id = $1",
                    )
                    .bind(request.step_state_id)
                    .bind(&meta)
                    .execute(&pool)
                    .await?;
                }
                debug!(
                    step_state_id = %request.step_state_id,
                    step_name = %request.step_name,
                    "Step handed off, awaiting callback"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    step_state_id = %request.step_state_id,
                    step_name = %request.step_name,
                    error = %e,
                    "Step worker failed"
                );
                let meta = serde_json::json!({ "error": e.to_string() });
                StepState::finish(&pool, request.step_state_id, StepOutcome::Failed, Some(&meta))
                    .await?;
                Ok(())
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[async_trait]
impl ComputeBackend for InProcessBackend {
    async fn spawn(&self, request: ComputeRequest) -> ConveyorResult<()> {
        let worker = self.lookup(&request)?;
        let pool = self.pool.clone();
        let relay = self.relay.clone();
        let step_state_id = request.step_state_id;
        tokio::spawn(async move {
            if let Err(e) = Self::execute(pool, relay, worker, request).await {
                error!(
                    step_state_id = %step_state_id,
                    error = %e,
                    "Worker execution could not reach the state store"
                );
            }
        });
        Ok(())
    }

    async fn spawn_and_wait(&self, request: ComputeRequest) -> ConveyorResult<()> {
        let worker = self.lookup(&request)?;
        Self::execute(self.pool.clone(), self.relay.clone(), worker, request).await
    }
}
