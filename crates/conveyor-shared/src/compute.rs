//! # Compute Backend Seam
//!
//! The dispatcher starts compute work through this trait and never learns
//! how workers run. Requests carry identities only — an item id and a step
//! name — never business payloads; workers fetch their own inputs from the
//! state store.

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::ConveyorResult;
use crate::types::ExecutionMode;

/// Identity-only invocation request handed to a compute backend
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ComputeRequest {
    pub step_state_id: Uuid,
    pub batch_id: Uuid,
    pub item_id: Uuid,
    pub step_name: String,
    pub workstream: String,
    pub client_id: Uuid,
    pub mode: ExecutionMode,
    /// Registry-declared sender function name
    pub sender_fn: String,
}

/// Backend capable of starting compute work for a claimed step state.
///
/// `spawn` must not block on work completion: SYNC workers finish in the
/// background task, ASYNC senders hand off to an external provider. An
/// `Err` from `spawn` means the invocation itself failed (dispatch error);
/// the caller reverts the row to PENDING. Failures *inside* the work are
/// recorded in-row by the worker, never surfaced here.
#[async_trait]
pub trait ComputeBackend: Send + Sync + std::fmt::Debug {
    async fn spawn(&self, request: ComputeRequest) -> ConveyorResult<()>;

    /// Like `spawn`, but awaits SYNC work inline. Backends without an inline
    /// path fall back to `spawn`.
    async fn spawn_and_wait(&self, request: ComputeRequest) -> ConveyorResult<()> {
        self.spawn(request).await
    }
}
