//! # Error Types
//!
//! Unified error type for the conveyor system. Failures that belong to a
//! single work unit are recorded in-row (status + meta) rather than raised
//! across component boundaries; these variants cover the failures that do
//! cross boundaries (database access, configuration, validation, dispatch).

use thiserror::Error;
use uuid::Uuid;

/// Result alias used throughout the workspace
pub type ConveyorResult<T> = Result<T, ConveyorError>;

#[derive(Debug, Error)]
pub enum ConveyorError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("validation error: {0}")]
    Validation(String),

    /// Fatal to batch creation: surfaced before any item or step state rows
    /// are written.
    #[error("no active pipeline for workstream '{workstream}' (client: {client_id:?})")]
    NoActivePipeline {
        workstream: String,
        client_id: Option<Uuid>,
    },

    /// The invocation of a compute worker failed (as opposed to the work
    /// itself failing). The claimed row is reverted to PENDING for retry.
    #[error("dispatch error for step '{step_name}': {reason}")]
    Dispatch { step_name: String, reason: String },

    #[error("worker error: {0}")]
    Worker(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),
}

impl ConveyorError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_active_pipeline_display_names_the_scope() {
        let err = ConveyorError::NoActivePipeline {
            workstream: "lead_enrichment".to_string(),
            client_id: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("lead_enrichment"));
        assert!(msg.contains("None"));
    }

    #[test]
    fn dispatch_error_display() {
        let err = ConveyorError::Dispatch {
            step_name: "normalize".to_string(),
            reason: "no worker registered".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "dispatch error for step 'normalize': no worker registered"
        );
    }

    #[test]
    fn not_found_constructor() {
        let id = Uuid::new_v4();
        let err = ConveyorError::not_found("batch", id);
        assert!(err.to_string().contains("batch not found"));
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn sqlx_error_converts() {
        let err: ConveyorError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, ConveyorError::Database(_)));
    }
}
