//! # Event Relay
//!
//! Best-effort wake channel over Postgres NOTIFY. The relay is strictly a
//! hint layered on the authoritative polling loop: notifications may be
//! lost, duplicated, or delayed, and a triggering write is never blocked or
//! rolled back by relay failure. Deleting the relay leaves the system
//! correct, just slower.

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::errors::ConveyorResult;

/// Buffer for the listener-to-loop wake channel; overflow just drops hints
const WAKE_CHANNEL_BUFFER: usize = 64;

/// Minimal-payload notifications emitted on state-store transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RelayEvent {
    /// A batch finished seeding and flipped to PENDING
    BatchSeeded { batch_id: Uuid },
    /// A step state reached COMPLETED
    StepCompleted { batch_id: Uuid, step_state_id: Uuid },
    /// The sequencer spawned new PENDING successors
    StepsReady { batch_id: Uuid },
}

impl RelayEvent {
    pub fn batch_id(&self) -> Uuid {
        match self {
            Self::BatchSeeded { batch_id }
            | Self::StepCompleted { batch_id, .. }
            | Self::StepsReady { batch_id } => *batch_id,
        }
    }
}

/// Fire-and-forget publisher for relay events
#[derive(Debug, Clone)]
pub struct EventRelay {
    pool: PgPool,
    config: RelayConfig,
}

impl EventRelay {
    pub fn new(pool: PgPool, config: RelayConfig) -> Self {
        Self { pool, config }
    }

    /// Publish an event without awaiting or surfacing delivery failure.
    /// The NOTIFY runs on a spawned task; failures are logged at `warn`.
    pub fn publish(&self, event: RelayEvent) {
        if !self.config.enabled {
            return;
        }

        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to serialize relay event, dropping");
                return;
            }
        };

        let pool = self.pool.clone();
        let channel = self.config.channel.clone();
        tokio::spawn(async move {
            let result = sqlx::query("SELECT pg_notify($1, $2)")
                .bind(&channel)
                .bind(&payload)
                .execute(&pool)
                .await;
            match result {
                Ok(_) => debug!(channel = %channel, payload = %payload, "Relay event published"),
                Err(e) => warn!(
                    channel = %channel,
                    error = %e,
                    "Relay delivery failed; polling remains the fallback"
                ),
            }
        });
    }
}

/// LISTEN side of the relay: turns NOTIFY payloads into a stream of
/// [`RelayEvent`]s for the orchestration loop.
#[derive(Debug)]
pub struct RelayListener {
    rx: mpsc::Receiver<RelayEvent>,
}

impl RelayListener {
    /// Connect a dedicated LISTEN connection and spawn the pump task.
    /// Malformed payloads are logged and dropped.
    pub async fn connect(pool: &PgPool, config: &RelayConfig) -> ConveyorResult<Self> {
        let mut listener = PgListener::connect_with(pool).await?;
        listener.listen(&config.channel).await?;

        let (tx, rx) = mpsc::channel(WAKE_CHANNEL_BUFFER);
        tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        match serde_json::from_str::<RelayEvent>(notification.payload()) {
                            Ok(event) => {
                                // A full buffer means a wake is already queued
                                let _ = tx.try_send(event);
                            }
                            Err(e) => {
                                warn!(
                                    payload = %notification.payload(),
                                    error = %e,
                                    "Dropping malformed relay payload"
                                );
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Relay listener connection error, stopping");
                        break;
                    }
                }
            }
        });

        Ok(Self { rx })
    }

    /// Next relay event; `None` once the listener task has stopped
    pub async fn recv(&mut self) -> Option<RelayEvent> {
        self.rx.recv().await
    }
}
