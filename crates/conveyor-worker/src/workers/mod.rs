//! Built-in workers. Domain-specific SYNC workers implement [`StepWorker`]
//! directly; the webhook sender covers the common ASYNC pattern.
//!
//! [`StepWorker`]: crate::registry::StepWorker

pub mod webhook;

pub use webhook::WebhookSender;
