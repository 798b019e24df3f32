//! # conveyor-worker
//!
//! The compute side of the conveyor system: the [`StepWorker`] trait, an
//! in-process [`ComputeBackend`] that runs registered workers on the local
//! runtime, and the built-in webhook sender for ASYNC steps.
//!
//! Workers never talk to the orchestration crate. They read their inputs
//! from the state store through [`WorkerContext`] and write their outcomes
//! back as idempotent terminal writes; the dispatcher and sequencer observe
//! those writes like any other.
//!
//! [`ComputeBackend`]: conveyor_shared::compute::ComputeBackend

pub mod context;
pub mod registry;
pub mod workers;

pub use context::WorkerContext;
pub use registry::{InProcessBackend, StepWorker, WorkOutcome};
pub use workers::WebhookSender;
