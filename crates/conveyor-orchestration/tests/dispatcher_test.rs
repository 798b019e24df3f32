//! Dispatcher claiming semantics: exclusivity, eligibility, revert-on-failure.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use common::{batch_status, seed_batch, step_rows, step_state_status};
use conveyor_orchestration::dispatcher::Dispatcher;
use conveyor_shared::compute::{ComputeBackend, ComputeRequest};
use conveyor_shared::config::DispatcherConfig;
use conveyor_shared::models::Batch;
use conveyor_shared::{ConveyorError, ConveyorResult};

/// Backend that records every request it receives
#[derive(Debug, Default)]
struct RecordingBackend {
    requests: Mutex<Vec<ComputeRequest>>,
}

impl RecordingBackend {
    fn seen(&self) -> Vec<ComputeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ComputeBackend for RecordingBackend {
    async fn spawn(&self, request: ComputeRequest) -> ConveyorResult<()> {
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}

/// Backend whose invocation call always fails
#[derive(Debug)]
struct FailingBackend;

#[async_trait]
impl ComputeBackend for FailingBackend {
    async fn spawn(&self, request: ComputeRequest) -> ConveyorResult<()> {
        Err(ConveyorError::Dispatch {
            step_name: request.step_name,
            reason: "backend unavailable".to_string(),
        })
    }
}

fn dispatcher(pool: &PgPool, backend: Arc<dyn ComputeBackend>) -> Dispatcher {
    Dispatcher::new(pool.clone(), backend, DispatcherConfig::default())
}

#[sqlx::test(migrator = "conveyor_shared::database::migrator::MIGRATOR")]
async fn claims_first_steps_and_dispatches_each_once(pool: PgPool) {
    let (_, seeded) = seed_batch(&pool, &["normalize", "enrich"], 3).await;
    let backend = Arc::new(RecordingBackend::default());
    let stats = dispatcher(&pool, backend.clone()).run_once().await.unwrap();

    assert_eq!(stats.claimed, 3);
    assert_eq!(stats.dispatched, 3);
    assert_eq!(stats.reverted, 0);

    let seen = backend.seen();
    assert_eq!(seen.len(), 3);
    for request in &seen {
        assert_eq!(request.step_name, "normalize");
        assert_eq!(request.batch_id, seeded.batch_id);
        assert_eq!(request.sender_fn, "run_normalize");
    }

    for (_, step, status) in step_rows(&pool, seeded.batch_id).await {
        assert_eq!(step, "normalize");
        assert_eq!(status, "QUEUED");
    }
}

#[sqlx::test(migrator = "conveyor_shared::database::migrator::MIGRATOR")]
async fn concurrent_runs_partition_the_work(pool: PgPool) {
    let (_, seeded) = seed_batch(&pool, &["normalize"], 10).await;
    let backend = Arc::new(RecordingBackend::default());
    let a = dispatcher(&pool, backend.clone());
    let b = dispatcher(&pool, backend.clone());

    let (ra, rb) = tokio::join!(a.run_once(), b.run_once());
    let (sa, sb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(sa.claimed + sb.claimed, 10);

    let mut ids: Vec<Uuid> = backend.seen().iter().map(|r| r.step_state_id).collect();
    let before = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), before, "a step state was dispatched twice");
    assert_eq!(ids.len(), 10);

    for (_, _, status) in step_rows(&pool, seeded.batch_id).await {
        assert_eq!(status, "QUEUED");
    }
}

#[sqlx::test(migrator = "conveyor_shared::database::migrator::MIGRATOR")]
async fn second_pass_finds_nothing(pool: PgPool) {
    seed_batch(&pool, &["normalize"], 2).await;
    let backend = Arc::new(RecordingBackend::default());
    let d = dispatcher(&pool, backend.clone());

    let first = d.run_once().await.unwrap();
    assert_eq!(first.claimed, 2);

    let second = d.run_once().await.unwrap();
    assert_eq!(second.claimed, 0);
    assert_eq!(backend.seen().len(), 2);
}

#[sqlx::test(migrator = "conveyor_shared::database::migrator::MIGRATOR")]
async fn dispatch_failure_reverts_to_pending(pool: PgPool) {
    let (_, seeded) = seed_batch(&pool, &["normalize"], 1).await;
    let stats = dispatcher(&pool, Arc::new(FailingBackend))
        .run_once()
        .await
        .unwrap();

    assert_eq!(stats.claimed, 1);
    assert_eq!(stats.dispatched, 0);
    assert_eq!(stats.reverted, 1);

    let (_, _, status) = step_rows(&pool, seeded.batch_id).await.pop().unwrap();
    assert_eq!(status, "PENDING");

    // a later pass with a healthy backend picks the row back up
    let backend = Arc::new(RecordingBackend::default());
    let retry = dispatcher(&pool, backend.clone()).run_once().await.unwrap();
    assert_eq!(retry.dispatched, 1);
}

#[sqlx::test(migrator = "conveyor_shared::database::migrator::MIGRATOR")]
async fn cancelled_batches_are_not_claimed(pool: PgPool) {
    let (_, seeded) = seed_batch(&pool, &["normalize"], 2).await;
    assert!(Batch::cancel(&pool, seeded.batch_id).await.unwrap());
    assert_eq!(batch_status(&pool, seeded.batch_id).await, "CANCELLED");

    let backend = Arc::new(RecordingBackend::default());
    let stats = dispatcher(&pool, backend.clone()).run_once().await.unwrap();

    assert_eq!(stats.claimed, 0);
    assert!(backend.seen().is_empty());
}

#[sqlx::test(migrator = "conveyor_shared::database::migrator::MIGRATOR")]
async fn unregistered_steps_are_not_claimed(pool: PgPool) {
    // pipeline references a step with no registry entry
    let client = common::seed_client(&pool).await;
    common::seed_default_pipeline(&pool, &["mystery_step"]).await;
    let initializer = conveyor_orchestration::lifecycle::BatchInitializer::new(
        pool.clone(),
        common::quiet_relay(&pool),
    );
    let seeded = initializer
        .seed(conveyor_orchestration::lifecycle::BatchSeedRequest {
            client_id: client.id,
            workstream: common::WORKSTREAM.to_string(),
            items: vec![serde_json::json!({"email": "a@b.c"})],
        })
        .await
        .unwrap();

    let backend = Arc::new(RecordingBackend::default());
    let stats = dispatcher(&pool, backend.clone()).run_once().await.unwrap();
    assert_eq!(stats.claimed, 0);

    // the row stays PENDING until an administrator registers the step
    let (_, _, status) = step_rows(&pool, seeded.batch_id).await.pop().unwrap();
    assert_eq!(status, "PENDING");
}

#[sqlx::test(migrator = "conveyor_shared::database::migrator::MIGRATOR")]
async fn initializing_batches_are_invisible(pool: PgPool) {
    // a half-seeded batch: shell and one row exist, status never flipped
    let client = common::seed_client(&pool).await;
    common::register_sync_steps(&pool, &["normalize"]).await;

    let mut tx = pool.begin().await.unwrap();
    let batch = Batch::insert_initializing(
        &mut tx,
        client.id,
        common::WORKSTREAM,
        &["normalize".to_string()],
    )
    .await
    .unwrap();
    let item = conveyor_shared::models::BatchItem::insert(
        &mut tx,
        batch.id,
        &serde_json::json!({"email": "a@b.c"}),
    )
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO step_states (batch_id, item_id, step_name, status) VALUES ($1, $2, 'normalize', 'PENDING')",
    )
    .bind(batch.id)
    .bind(item.id)
    .execute(&mut *tx)
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let backend = Arc::new(RecordingBackend::default());
    let stats = dispatcher(&pool, backend.clone()).run_once().await.unwrap();
    assert_eq!(stats.claimed, 0);
    assert_eq!(batch_status(&pool, batch.id).await, "INITIALIZING");
}

#[sqlx::test(migrator = "conveyor_shared::database::migrator::MIGRATOR")]
async fn claimed_rows_keep_registry_metadata(pool: PgPool) {
    seed_batch(&pool, &["normalize"], 1).await;
    let backend = Arc::new(RecordingBackend::default());
    dispatcher(&pool, backend.clone()).run_once().await.unwrap();

    let request = backend.seen().pop().unwrap();
    assert_eq!(request.workstream, common::WORKSTREAM);
    assert_eq!(request.mode, conveyor_shared::types::ExecutionMode::Sync);

    let status = step_state_status(&pool, request.step_state_id).await;
    assert_eq!(status, "QUEUED");
}
