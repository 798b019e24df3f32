//! # Pipeline Resolver
//!
//! Computes the single effective ordered step list for a (workstream,
//! client) pair: an active client-scoped pipeline overrides the workstream
//! default. Read-only, so callers may invoke it repeatedly or cache the
//! result briefly.

use sqlx::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

use conveyor_shared::models::Pipeline;
use conveyor_shared::{ConveyorError, ConveyorResult};

/// Which scope the effective pipeline came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineSource {
    /// Active client-scoped pipeline
    Override,
    /// Active workstream default (no client owner)
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPipeline {
    pub pipeline_id: Uuid,
    pub steps: Vec<String>,
    pub source: PipelineSource,
}

#[derive(Debug, Clone)]
pub struct PipelineResolver {
    pool: PgPool,
}

impl PipelineResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve the effective pipeline, or fail with `NoActivePipeline` so
    /// batch creation cannot proceed with an empty blueprint.
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        workstream: &str,
        client_id: Option<Uuid>,
    ) -> ConveyorResult<ResolvedPipeline> {
        if let Some(client) = client_id {
            if let Some(pipeline) = Pipeline::find_active(&self.pool, workstream, Some(client)).await?
            {
                debug!(
                    workstream = %workstream,
                    client_id = %client,
                    pipeline_id = %pipeline.id,
                    "Resolved client override pipeline"
                );
                return Ok(resolved(pipeline, PipelineSource::Override));
            }
        }

        if let Some(pipeline) = Pipeline::find_active(&self.pool, workstream, None).await? {
            debug!(
                workstream = %workstream,
                pipeline_id = %pipeline.id,
                "Resolved workstream default pipeline"
            );
            return Ok(resolved(pipeline, PipelineSource::Default));
        }

        Err(ConveyorError::NoActivePipeline {
            workstream: workstream.to_string(),
            client_id,
        })
    }
}

fn resolved(pipeline: Pipeline, source: PipelineSource) -> ResolvedPipeline {
    ResolvedPipeline {
        pipeline_id: pipeline.id,
        steps: pipeline.steps.0,
        source,
    }
}
