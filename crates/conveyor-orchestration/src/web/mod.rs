//! # Web API
//!
//! Operator and callback surface over the orchestration machine. Handlers
//! are thin: validation and status mapping here, semantics in the lifecycle
//! components and shared models.
//!
//! The callback endpoint is the receiving half of ASYNC steps. It applies
//! the same idempotent terminal write workers use, so a provider delivering
//! the same callback twice gets `applied: false` the second time, never an
//! error.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use conveyor_shared::events::{EventRelay, RelayEvent};
use conveyor_shared::models::{
    Batch, NewPipeline, Pipeline, StepOutcome, StepResult, StepState,
};
use conveyor_shared::types::{BatchStatus, StepStatus};
use conveyor_shared::ConveyorError;

use crate::lifecycle::{BatchInitializer, BatchSeedRequest, SeededBatch};

#[derive(Debug, Clone)]
pub struct AppState {
    pool: PgPool,
    initializer: Arc<BatchInitializer>,
    relay: EventRelay,
}

impl AppState {
    pub fn new(pool: PgPool, relay: EventRelay) -> Self {
        let initializer = Arc::new(BatchInitializer::new(pool.clone(), relay.clone()));
        Self {
            pool,
            initializer,
            relay,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/batches", post(create_batch))
        .route("/v1/batches/{id}", get(get_batch))
        .route("/v1/batches/{id}/cancel", post(cancel_batch))
        .route("/v1/pipelines", post(create_pipeline))
        .route("/v1/pipelines/{id}/activate", post(activate_pipeline))
        .route("/v1/step-states/{id}/retry", post(retry_step))
        .route("/v1/callbacks", post(apply_callback))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error wrapper mapping domain failures onto HTTP statuses
#[derive(Debug)]
pub struct ApiError(ConveyorError);

impl From<ConveyorError> for ApiError {
    fn from(err: ConveyorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ConveyorError::Validation(_) => StatusCode::BAD_REQUEST,
            ConveyorError::NotFound { .. } => StatusCode::NOT_FOUND,
            ConveyorError::NoActivePipeline { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ConveyorError::InvalidTransition(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
        }
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /v1/batches
async fn create_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchSeedRequest>,
) -> Result<(StatusCode, Json<SeededBatch>), ApiError> {
    let seeded = state.initializer.seed(request).await?;
    Ok((StatusCode::CREATED, Json(seeded)))
}

#[derive(Debug, Serialize)]
struct ProgressEntry {
    step_name: String,
    status: StepStatus,
    count: i64,
}

#[derive(Debug, Serialize)]
struct BatchDetail {
    id: Uuid,
    client_id: Uuid,
    workstream: String,
    status: BatchStatus,
    blueprint: Vec<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    progress: Vec<ProgressEntry>,
}

/// GET /v1/batches/{id}
async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BatchDetail>, ApiError> {
    let batch = Batch::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| ConveyorError::not_found("batch", id))?;

    let progress = Batch::progress(&state.pool, id)
        .await?
        .into_iter()
        .map(|row| ProgressEntry {
            step_name: row.step_name,
            status: row.status,
            count: row.count,
        })
        .collect();

    Ok(Json(BatchDetail {
        id: batch.id,
        client_id: batch.client_id,
        workstream: batch.workstream,
        status: batch.status,
        blueprint: batch.blueprint.0,
        created_at: batch.created_at,
        progress,
    }))
}

/// POST /v1/batches/{id}/cancel
async fn cancel_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cancelled = state.initializer.cancel_batch(id).await?;
    Ok(Json(serde_json::json!({
        "batch_id": id,
        "cancelled": cancelled,
    })))
}

#[derive(Debug, Deserialize)]
struct CreatePipelineRequest {
    client_id: Option<Uuid>,
    workstream: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    steps: Vec<String>,
    /// Activate immediately, deactivating any sibling in the same scope
    #[serde(default)]
    activate: bool,
}

#[derive(Debug, Serialize)]
struct PipelineResponse {
    id: Uuid,
    client_id: Option<Uuid>,
    workstream: String,
    name: String,
    steps: Vec<String>,
    is_active: bool,
}

impl From<Pipeline> for PipelineResponse {
    fn from(pipeline: Pipeline) -> Self {
        Self {
            id: pipeline.id,
            client_id: pipeline.client_id,
            workstream: pipeline.workstream,
            name: pipeline.name,
            steps: pipeline.steps.0,
            is_active: pipeline.is_active,
        }
    }
}

/// POST /v1/pipelines
async fn create_pipeline(
    State(state): State<AppState>,
    Json(request): Json<CreatePipelineRequest>,
) -> Result<(StatusCode, Json<PipelineResponse>), ApiError> {
    let pipeline = Pipeline::create(
        &state.pool,
        NewPipeline {
            client_id: request.client_id,
            workstream: request.workstream,
            name: request.name,
            description: request.description,
            steps: request.steps,
        },
    )
    .await?;

    let pipeline = if request.activate {
        Pipeline::activate(&state.pool, pipeline.id).await?
    } else {
        pipeline
    };

    info!(
        pipeline_id = %pipeline.id,
        workstream = %pipeline.workstream,
        is_active = pipeline.is_active,
        "Pipeline created"
    );
    Ok((StatusCode::CREATED, Json(pipeline.into())))
}

/// POST /v1/pipelines/{id}/activate
async fn activate_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PipelineResponse>, ApiError> {
    let pipeline = Pipeline::activate(&state.pool, id).await?;
    info!(
        pipeline_id = %pipeline.id,
        workstream = %pipeline.workstream,
        "Pipeline activated"
    );
    Ok(Json(pipeline.into()))
}

/// POST /v1/step-states/{id}/retry
async fn retry_step(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let reset = state.initializer.retry_step(id).await?;
    Ok(Json(serde_json::json!({
        "step_state_id": id,
        "reset": reset,
    })))
}

/// External provider callback for an ASYNC step. The row is addressed either
/// by the opaque `step_state_id` the webhook sender embedded, or by the
/// `(batch_id, item_id, step_name)` routing tuple for providers that echo
/// routing keys instead.
#[derive(Debug, Deserialize)]
struct CallbackRequest {
    #[serde(default)]
    step_state_id: Option<Uuid>,
    #[serde(default)]
    batch_id: Option<Uuid>,
    #[serde(default)]
    item_id: Option<Uuid>,
    #[serde(default)]
    step_name: Option<String>,
    outcome: StepOutcome,
    /// Step output, recorded before the terminal write so a completed row
    /// always has its result in place.
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

impl CallbackRequest {
    async fn resolve_step(&self, pool: &PgPool) -> Result<StepState, ConveyorError> {
        if let Some(id) = self.step_state_id {
            return StepState::find_by_id(pool, id)
                .await?
                .ok_or_else(|| ConveyorError::not_found("step state", id));
        }
        match (self.batch_id, self.item_id, self.step_name.as_deref()) {
            (Some(batch_id), Some(item_id), Some(step_name)) => {
                StepState::find_by_tuple(pool, batch_id, item_id, step_name)
                    .await?
                    .ok_or_else(|| ConveyorError::not_found("step state", item_id))
            }
            _ => Err(ConveyorError::Validation(
                "callback must carry step_state_id or (batch_id, item_id, step_name)".to_string(),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
struct CallbackResponse {
    step_state_id: Uuid,
    /// False when the row was already terminal (duplicate delivery)
    applied: bool,
}

/// POST /v1/callbacks
async fn apply_callback(
    State(state): State<AppState>,
    Json(request): Json<CallbackRequest>,
) -> Result<Json<CallbackResponse>, ApiError> {
    let step = request.resolve_step(&state.pool).await?;

    if let Some(data) = &request.data {
        StepResult::record(&state.pool, step.batch_id, step.item_id, &step.step_name, data)
            .await?;
    }

    let meta = request
        .error
        .as_ref()
        .map(|e| serde_json::json!({ "error": e }));
    let applied =
        StepState::finish(&state.pool, step.id, request.outcome, meta.as_ref()).await?;

    if applied {
        info!(
            step_state_id = %step.id,
            batch_id = %step.batch_id,
            step_name = %step.step_name,
            outcome = ?request.outcome,
            "Callback applied"
        );
        if request.outcome == StepOutcome::Completed {
            state.relay.publish(RelayEvent::StepCompleted {
                batch_id: step.batch_id,
                step_state_id: step.id,
            });
        }
    }

    Ok(Json(CallbackResponse {
        step_state_id: step.id,
        applied,
    }))
}
