//! # Webhook Sender
//!
//! Generic ASYNC sender: posts the item payload to a client-configured
//! webhook endpoint and hands the step off. The external provider finishes
//! the step later through the callback endpoint, quoting the step state id
//! included in the request body.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use conveyor_shared::{ConveyorError, ConveyorResult};

use crate::context::WorkerContext;
use crate::registry::{StepWorker, WorkOutcome};

/// Client config key naming the endpoint to post to
const WEBHOOK_URL_KEY: &str = "webhook_url";

#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    step_state_id: uuid::Uuid,
    batch_id: uuid::Uuid,
    item_id: uuid::Uuid,
    step_name: &'a str,
    workstream: &'a str,
    payload: serde_json::Value,
}

/// ASYNC sender worker registered under a configurable `sender_fn` name
#[derive(Debug)]
pub struct WebhookSender {
    name: String,
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl StepWorker for WebhookSender {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &WorkerContext) -> ConveyorResult<WorkOutcome> {
        let request = ctx.request();

        let config = ctx.client_config().await?.ok_or_else(|| {
            ConveyorError::Worker(format!(
                "no client config for step '{}' (client {})",
                request.step_name, request.client_id
            ))
        })?;

        let url = config
            .get(WEBHOOK_URL_KEY)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ConveyorError::Worker(format!(
                    "client config for step '{}' is missing '{WEBHOOK_URL_KEY}'",
                    request.step_name
                ))
            })?
            .to_string();

        let body = WebhookBody {
            step_state_id: request.step_state_id,
            batch_id: request.batch_id,
            item_id: request.item_id,
            step_name: &request.step_name,
            workstream: &request.workstream,
            payload: ctx.item_payload().await?,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ConveyorError::Worker(format!("webhook send failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ConveyorError::Worker(format!(
                "webhook endpoint returned {}",
                response.status()
            )));
        }

        debug!(
            step_state_id = %request.step_state_id,
            step_name = %request.step_name,
            url = %url,
            "Webhook handoff accepted"
        );

        Ok(WorkOutcome::HandedOff {
            meta: Some(serde_json::json!({
                "handed_off_to": url,
                "handed_off_at": chrono::Utc::now().to_rfc3339(),
            })),
        })
    }
}
