//! Shared fixtures for the orchestration integration suites.
#![allow(dead_code)] // not every suite uses every helper

use sqlx::PgPool;
use uuid::Uuid;

use conveyor_orchestration::lifecycle::{BatchInitializer, BatchSeedRequest, SeededBatch};
use conveyor_shared::config::RelayConfig;
use conveyor_shared::events::EventRelay;
use conveyor_shared::models::{Client, NewPipeline, Pipeline, StepRegistryEntry};
use conveyor_shared::types::ExecutionMode;

pub const WORKSTREAM: &str = "lead_enrichment";

/// Relay with publishing disabled so tests never race spawned NOTIFY tasks
pub fn quiet_relay(pool: &PgPool) -> EventRelay {
    EventRelay::new(
        pool.clone(),
        RelayConfig {
            enabled: false,
            ..Default::default()
        },
    )
}

pub async fn seed_client(pool: &PgPool) -> Client {
    Client::create(pool, "Acme Corp", Some("acme.example"))
        .await
        .expect("client insert")
}

/// Create and activate a workstream-default pipeline
pub async fn seed_default_pipeline(pool: &PgPool, steps: &[&str]) -> Pipeline {
    let pipeline = Pipeline::create(
        pool,
        NewPipeline {
            client_id: None,
            workstream: WORKSTREAM.to_string(),
            name: "default".to_string(),
            description: None,
            steps: steps.iter().map(|s| s.to_string()).collect(),
        },
    )
    .await
    .expect("pipeline insert");
    Pipeline::activate(pool, pipeline.id).await.expect("activate")
}

/// Register every step as a SYNC worker invocation
pub async fn register_sync_steps(pool: &PgPool, steps: &[&str]) {
    for step in steps {
        StepRegistryEntry::upsert(
            pool,
            WORKSTREAM,
            step,
            step,
            ExecutionMode::Sync,
            &format!("run_{step}"),
            None,
        )
        .await
        .expect("registry upsert");
    }
}

/// Full fixture: client, active default pipeline, registry entries, and a
/// seeded batch with the given item payloads.
pub async fn seed_batch(pool: &PgPool, steps: &[&str], item_count: usize) -> (Client, SeededBatch) {
    let client = seed_client(pool).await;
    seed_default_pipeline(pool, steps).await;
    register_sync_steps(pool, steps).await;

    let initializer = BatchInitializer::new(pool.clone(), quiet_relay(pool));
    let items = (0..item_count)
        .map(|n| serde_json::json!({ "email": format!("lead{n}@example.com") }))
        .collect();
    let seeded = initializer
        .seed(BatchSeedRequest {
            client_id: client.id,
            workstream: WORKSTREAM.to_string(),
            items,
        })
        .await
        .expect("batch seed");
    (client, seeded)
}

pub async fn step_state_status(pool: &PgPool, id: Uuid) -> String {
    sqlx::query_scalar::<_, String>("SELECT status::text FROM step_states WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("step state status")
}

pub async fn batch_status(pool: &PgPool, id: Uuid) -> String {
    sqlx::query_scalar::<_, String>("SELECT status::text FROM batches WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("batch status")
}

/// All step state rows for a batch as (item_id, step_name, status) tuples
pub async fn step_rows(pool: &PgPool, batch_id: Uuid) -> Vec<(Uuid, String, String)> {
    sqlx::query_as::<_, (Uuid, String, String)>(
        r#"
        SELECT item_id, step_name, status::text
        FROM step_states
        WHERE batch_id = $1
        ORDER BY step_name, item_id
        "#,
    )
    .bind(batch_id)
    .fetch_all(pool)
    .await
    .expect("step rows")
}
