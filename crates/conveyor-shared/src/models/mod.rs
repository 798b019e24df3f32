//! # State Store Models
//!
//! Row types and their access methods. Every cross-invocation coordination
//! primitive (claiming, advancement, activation, idempotent terminal writes)
//! lives here as a conditional update; callers never hold locks outside the
//! database.

pub mod batch;
pub mod batch_item;
pub mod client;
pub mod client_config;
pub mod pipeline;
pub mod registry;
pub mod step_result;
pub mod step_state;

pub use batch::{Batch, BatchOutcomeCounts, BatchProgressRow};
pub use batch_item::BatchItem;
pub use client::Client;
pub use client_config::ClientStepConfig;
pub use pipeline::{NewPipeline, Pipeline};
pub use registry::StepRegistryEntry;
pub use step_result::StepResult;
pub use step_state::{DispatchableStep, StepOutcome, StepState};
