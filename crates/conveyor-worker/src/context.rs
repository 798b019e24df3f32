//! # Worker Context
//!
//! Per-invocation handle a worker runs against. The compute request carries
//! identities only, so everything a worker needs — the item payload, prior
//! step results, client configuration — is fetched from the state store
//! through this context.

use sqlx::PgPool;
use uuid::Uuid;

use conveyor_shared::compute::ComputeRequest;
use conveyor_shared::models::{BatchItem, ClientStepConfig, StepResult};
use conveyor_shared::{ConveyorError, ConveyorResult};

#[derive(Debug, Clone)]
pub struct WorkerContext {
    pool: PgPool,
    request: ComputeRequest,
}

impl WorkerContext {
    pub fn new(pool: PgPool, request: ComputeRequest) -> Self {
        Self { pool, request }
    }

    pub fn request(&self) -> &ComputeRequest {
        &self.request
    }

    pub fn step_state_id(&self) -> Uuid {
        self.request.step_state_id
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The raw input record this step is processing
    pub async fn item_payload(&self) -> ConveyorResult<serde_json::Value> {
        let item = BatchItem::find_by_id(&self.pool, self.request.item_id)
            .await?
            .ok_or_else(|| ConveyorError::not_found("batch item", self.request.item_id))?;
        Ok(item.payload)
    }

    /// Output of an earlier step for the same item, if that step recorded one
    pub async fn prior_result(&self, step_name: &str) -> ConveyorResult<Option<serde_json::Value>> {
        let result = StepResult::find(
            &self.pool,
            self.request.batch_id,
            self.request.item_id,
            step_name,
        )
        .await?;
        Ok(result.map(|r| r.data))
    }

    /// Client-scoped configuration for this step (webhook URLs, provider
    /// settings), if any
    pub async fn client_config(&self) -> ConveyorResult<Option<serde_json::Value>> {
        let config = ClientStepConfig::find(
            &self.pool,
            self.request.client_id,
            &self.request.workstream,
            &self.request.step_name,
        )
        .await?;
        Ok(config.map(|c| c.config))
    }
}
