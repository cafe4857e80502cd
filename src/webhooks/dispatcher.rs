//! Entry point for domain events that fan out to webhooks.

use super::delivery::DeliveryEngine;
use super::store::{DeliveryStore, WebhookStore};
use crate::db::new_id;
use crate::error::FluxError;
use crate::types::{
    DeliveryOutcome, DeliveryUpdate, Webhook, WebhookDelivery, WebhookEventType, WebhookPayload,
    now_rfc3339,
};
use anyhow::{Result, anyhow};
use serde_json::{Value, json};
use std::any::Any;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, warn};

/// Default cap for `get_recent_deliveries`.
pub const DEFAULT_DELIVERY_LIMIT: usize = 50;

/// Hands events to the delivery engine without making callers wait on I/O.
#[derive(Clone)]
pub struct WebhookDispatcher {
    engine: Arc<DeliveryEngine>,
    deliveries: Arc<dyn DeliveryStore>,
    webhooks: Arc<dyn WebhookStore>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown error".to_string()
    }
}

fn join_error_message(err: JoinError) -> String {
    if err.is_panic() {
        panic_message(err.into_panic().as_ref())
    } else {
        "delivery task was cancelled".to_string()
    }
}

impl WebhookDispatcher {
    pub fn new(
        engine: Arc<DeliveryEngine>,
        deliveries: Arc<dyn DeliveryStore>,
        webhooks: Arc<dyn WebhookStore>,
    ) -> Self {
        Self {
            engine,
            deliveries,
            webhooks,
        }
    }

    pub fn engine(&self) -> &Arc<DeliveryEngine> {
        &self.engine
    }

    /// Record a pending delivery and start delivering it in the background.
    ///
    /// Every call gets a fresh delivery id, written into the envelope's
    /// `webhook_id`, so one payload can be dispatched any number of times.
    /// Returns once the record exists. Failures in the background flow end
    /// up as a `failed` record and never reach the caller.
    pub fn handle_webhook_event(
        &self,
        event: WebhookEventType,
        payload: WebhookPayload,
        webhook: Webhook,
    ) -> Result<WebhookDelivery> {
        let (delivery, _detached) = self.dispatch(event, payload, webhook)?;
        Ok(delivery)
    }

    /// Same as `handle_webhook_event`, also returning a handle that resolves
    /// when the delivery flow, including any failure bookkeeping, is over.
    pub fn dispatch(
        &self,
        event: WebhookEventType,
        mut payload: WebhookPayload,
        webhook: Webhook,
    ) -> Result<(WebhookDelivery, JoinHandle<()>)> {
        let runtime = Handle::try_current()
            .map_err(|e| anyhow!("webhook dispatch requires a tokio runtime: {}", e))?;

        payload.webhook_id = new_id();
        let delivery = self
            .deliveries
            .create_delivery(&webhook.id, event, &payload)?;

        debug!(
            webhook_id = %webhook.id,
            delivery_id = %delivery.id,
            event = %event,
            "Webhook delivery queued"
        );

        let delivery_id = delivery.id.clone();
        let webhook_id = webhook.id.clone();
        let engine = Arc::clone(&self.engine);
        let flow = {
            let delivery_id = delivery_id.clone();
            runtime.spawn(async move {
                engine
                    .deliver_with_retry(&webhook, &payload, &delivery_id, 0)
                    .await
            })
        };

        let store = Arc::clone(&self.deliveries);
        let supervisor = runtime.spawn(async move {
            let failure = match flow.await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{:#}", e)),
                Err(e) => Some(join_error_message(e)),
            };

            if let Some(message) = failure {
                error!(
                    webhook_id = %webhook_id,
                    delivery_id = %delivery_id,
                    error = %message,
                    "Webhook delivery error"
                );
                if let Err(e) =
                    store.update_delivery(&delivery_id, &DeliveryUpdate::failed_with(message))
                {
                    error!(
                        delivery_id = %delivery_id,
                        error = %e,
                        "Failed to mark webhook delivery as failed"
                    );
                }
            }
        });

        Ok((delivery, supervisor))
    }

    /// Fan an event out to every interested webhook, one delivery each.
    ///
    /// A webhook whose record cannot be created is skipped and logged so the
    /// others still go out.
    pub fn emit(
        &self,
        event: WebhookEventType,
        project_id: Option<&str>,
        data: Value,
    ) -> Result<Vec<WebhookDelivery>> {
        let targets = self.webhooks.webhooks_for_event(event, project_id)?;
        let payload = WebhookPayload::new(event, data);
        let mut queued = Vec::with_capacity(targets.len());

        for webhook in targets {
            let webhook_id = webhook.id.clone();
            match self.handle_webhook_event(event, payload.clone(), webhook) {
                Ok(delivery) => queued.push(delivery),
                Err(e) => warn!(
                    webhook_id = %webhook_id,
                    event = %event,
                    error = %e,
                    "Failed to queue webhook delivery"
                ),
            }
        }

        Ok(queued)
    }

    /// One attempt with a canned `task.created` payload. Creates no record.
    pub async fn test_webhook_delivery(&self, webhook: &Webhook) -> DeliveryOutcome {
        let now = now_rfc3339();
        let payload = WebhookPayload {
            event: WebhookEventType::TaskCreated,
            timestamp: now.clone(),
            webhook_id: webhook.id.clone(),
            data: json!({
                "task": {
                    "id": "test-task-id",
                    "title": "Test Task",
                    "status": "todo",
                    "depends_on": [],
                    "comments": [{
                        "id": "test",
                        "body": "This is a test webhook delivery",
                        "author": "user",
                        "created_at": now,
                    }],
                    "project_id": "test-project-id",
                }
            }),
        };

        self.engine.deliver(webhook, &payload).await
    }

    /// `test_webhook_delivery` for a stored webhook.
    pub async fn test_webhook(&self, webhook_id: &str) -> Result<DeliveryOutcome> {
        let webhook = self
            .webhooks
            .find_webhook(webhook_id)?
            .ok_or_else(|| FluxError::webhook_not_found(webhook_id))?;
        Ok(self.test_webhook_delivery(&webhook).await)
    }

    /// Most recent deliveries first, capped at `limit` (default 50).
    pub fn get_recent_deliveries(
        &self,
        webhook_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<WebhookDelivery>> {
        self.deliveries
            .list_deliveries(webhook_id, limit.unwrap_or(DEFAULT_DELIVERY_LIMIT))
    }
}
