//! # conveyor-shared
//!
//! Shared foundation for the conveyor orchestration system: the state-store
//! models and their conditional-update coordination primitives, domain status
//! types, configuration, the pg_notify event relay, and the compute-backend
//! seam between the dispatcher and workers.
//!
//! The relational store is the only component holding authoritative state;
//! everything in this crate is a view onto it or a way to mutate it
//! atomically.

pub mod compute;
pub mod config;
pub mod database;
pub mod errors;
pub mod events;
pub mod models;
pub mod types;

pub use errors::{ConveyorError, ConveyorResult};
