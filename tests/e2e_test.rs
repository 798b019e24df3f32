//! End-to-end runs of the full machine: web-free seeding, orchestration
//! ticks with the in-process backend, terminal batch outcomes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use conveyor_orchestration::lifecycle::{BatchInitializer, BatchSeedRequest, SeededBatch};
use conveyor_orchestration::OrchestrationLoop;
use conveyor_shared::config::{ConveyorConfig, RelayConfig};
use conveyor_shared::events::EventRelay;
use conveyor_shared::models::{
    Batch, Client, NewPipeline, Pipeline, StepRegistryEntry, StepResult,
};
use conveyor_shared::types::{BatchStatus, ExecutionMode};
use conveyor_shared::{ConveyorError, ConveyorResult};
use conveyor_worker::{InProcessBackend, StepWorker, WorkOutcome, WorkerContext};

const WORKSTREAM: &str = "lead_enrichment";

/// Lowercases the email in the item payload
#[derive(Debug)]
struct NormalizeWorker;

#[async_trait]
impl StepWorker for NormalizeWorker {
    fn name(&self) -> &str {
        "run_normalize"
    }

    async fn run(&self, ctx: &WorkerContext) -> ConveyorResult<WorkOutcome> {
        let payload = ctx.item_payload().await?;
        let email = payload["email"]
            .as_str()
            .ok_or_else(|| ConveyorError::Worker("item has no email".to_string()))?
            .to_lowercase();
        Ok(WorkOutcome::Completed(serde_json::json!({ "email": email })))
    }
}

/// Builds on the normalize output; fails once per poisoned item, then
/// succeeds on retry.
#[derive(Debug)]
struct EnrichWorker {
    poison_tripped: AtomicBool,
}

impl EnrichWorker {
    fn new() -> Self {
        Self {
            poison_tripped: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl StepWorker for EnrichWorker {
    fn name(&self) -> &str {
        "run_enrich"
    }

    async fn run(&self, ctx: &WorkerContext) -> ConveyorResult<WorkOutcome> {
        let payload = ctx.item_payload().await?;
        if payload["poison"].as_bool().unwrap_or(false)
            && !self.poison_tripped.swap(true, Ordering::SeqCst)
        {
            return Err(ConveyorError::Worker("provider timeout".to_string()));
        }

        let normalized = ctx
            .prior_result("normalize")
            .await?
            .ok_or_else(|| ConveyorError::Worker("normalize result missing".to_string()))?;
        Ok(WorkOutcome::Completed(serde_json::json!({
            "email": normalized["email"],
            "company": "Acme Corp",
        })))
    }
}

fn test_config() -> ConveyorConfig {
    let mut config = ConveyorConfig::default();
    // deterministic ticks: no NOTIFY tasks, SYNC work awaited inline
    config.relay.enabled = false;
    config.orchestration.dispatcher.wait_for_sync = true;
    config
}

async fn seed(pool: &PgPool, items: Vec<serde_json::Value>) -> (Client, SeededBatch) {
    let client = Client::create(pool, "Acme Corp", Some("acme.example"))
        .await
        .unwrap();

    let pipeline = Pipeline::create(
        pool,
        NewPipeline {
            client_id: None,
            workstream: WORKSTREAM.to_string(),
            name: "default".to_string(),
            description: None,
            steps: vec!["normalize".to_string(), "enrich".to_string()],
        },
    )
    .await
    .unwrap();
    Pipeline::activate(pool, pipeline.id).await.unwrap();

    for (slug, sender_fn) in [("normalize", "run_normalize"), ("enrich", "run_enrich")] {
        StepRegistryEntry::upsert(pool, WORKSTREAM, slug, slug, ExecutionMode::Sync, sender_fn, None)
            .await
            .unwrap();
    }

    let relay = EventRelay::new(
        pool.clone(),
        RelayConfig {
            enabled: false,
            ..Default::default()
        },
    );
    let initializer = BatchInitializer::new(pool.clone(), relay);
    let seeded = initializer
        .seed(BatchSeedRequest {
            client_id: client.id,
            workstream: WORKSTREAM.to_string(),
            items,
        })
        .await
        .unwrap();
    (client, seeded)
}

fn orchestration(pool: &PgPool) -> OrchestrationLoop {
    let config = test_config();
    let relay = EventRelay::new(pool.clone(), config.relay.clone());
    let backend = Arc::new(
        InProcessBackend::new(pool.clone(), relay)
            .register(Arc::new(NormalizeWorker))
            .register(Arc::new(EnrichWorker::new())),
    );
    OrchestrationLoop::new(pool.clone(), backend, config)
}

async fn run_until_terminal(loop_: &OrchestrationLoop, pool: &PgPool, batch_id: Uuid) -> BatchStatus {
    for tick in 1..=10 {
        loop_.tick(tick).await.unwrap();
        let batch = Batch::find_by_id(pool, batch_id).await.unwrap().unwrap();
        if batch.status.is_terminal() {
            return batch.status;
        }
    }
    panic!("batch never reached a terminal status");
}

#[sqlx::test(migrator = "conveyor_shared::database::migrator::MIGRATOR")]
async fn two_step_batch_runs_to_completed(pool: PgPool) {
    let (_, seeded) = seed(
        &pool,
        vec![
            serde_json::json!({"email": "Jane@Example.COM"}),
            serde_json::json!({"email": "OTHER@example.com"}),
        ],
    )
    .await;

    let loop_ = orchestration(&pool);
    let status = run_until_terminal(&loop_, &pool, seeded.batch_id).await;
    assert_eq!(status, BatchStatus::Completed);

    // every item carries both step results, built on each other
    let items: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM batch_items WHERE batch_id = $1")
        .bind(seeded.batch_id)
        .fetch_all(&pool)
        .await
        .unwrap();
    for item_id in items {
        let normalized = StepResult::find(&pool, seeded.batch_id, item_id, "normalize")
            .await
            .unwrap()
            .unwrap();
        let email = normalized.data["email"].as_str().unwrap();
        assert_eq!(email, email.to_lowercase());

        let enriched = StepResult::find(&pool, seeded.batch_id, item_id, "enrich")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(enriched.data["company"], "Acme Corp");
        assert_eq!(enriched.data["email"], normalized.data["email"]);
    }
}

#[sqlx::test(migrator = "conveyor_shared::database::migrator::MIGRATOR")]
async fn poisoned_item_fails_the_batch_and_retry_recovers_it(pool: PgPool) {
    let (_, seeded) = seed(
        &pool,
        vec![
            serde_json::json!({"email": "ok@example.com"}),
            serde_json::json!({"email": "bad@example.com", "poison": true}),
        ],
    )
    .await;

    let loop_ = orchestration(&pool);
    let status = run_until_terminal(&loop_, &pool, seeded.batch_id).await;
    assert_eq!(status, BatchStatus::Failed);

    // exactly one FAILED step state, on the poisoned item's enrich step
    let failed: Vec<(Uuid, String)> = sqlx::query_as(
        "SELECT id, step_name FROM step_states WHERE batch_id = $1 AND status = 'FAILED'",
    )
    .bind(seeded.batch_id)
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].1, "enrich");

    // operator retry: the worker's transient failure does not repeat
    let relay = EventRelay::new(
        pool.clone(),
        RelayConfig {
            enabled: false,
            ..Default::default()
        },
    );
    let initializer = BatchInitializer::new(pool.clone(), relay);
    assert!(initializer.retry_step(failed[0].0).await.unwrap());

    let status = run_until_terminal(&loop_, &pool, seeded.batch_id).await;
    assert_eq!(status, BatchStatus::Completed);
}

#[sqlx::test(migrator = "conveyor_shared::database::migrator::MIGRATOR")]
async fn cancelled_batch_is_left_alone_by_the_loop(pool: PgPool) {
    let (_, seeded) = seed(&pool, vec![serde_json::json!({"email": "a@b.c"})]).await;
    assert!(Batch::cancel(&pool, seeded.batch_id).await.unwrap());

    let loop_ = orchestration(&pool);
    for tick in 1..=3 {
        loop_.tick(tick).await.unwrap();
    }

    let batch = Batch::find_by_id(&pool, seeded.batch_id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Cancelled);

    // nothing ever left PENDING
    let started: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM step_states WHERE batch_id = $1 AND status <> 'PENDING'",
    )
    .bind(seeded.batch_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(started, 0);
}
