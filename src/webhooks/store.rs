//! Storage seams used by the delivery engine and dispatcher.
//!
//! The delivery record store is the only place delivery state lives. Neither
//! the engine nor the dispatcher caches a record beyond a single attempt.

use crate::types::{DeliveryUpdate, Webhook, WebhookDelivery, WebhookEventType, WebhookPayload};
use anyhow::Result;

/// Ledger of webhook delivery records.
pub trait DeliveryStore: Send + Sync {
    /// Create a `pending` record keyed by `payload.webhook_id`.
    fn create_delivery(
        &self,
        webhook_id: &str,
        event: WebhookEventType,
        payload: &WebhookPayload,
    ) -> Result<WebhookDelivery>;

    /// Apply `update` to a record. Unknown ids are a `DELIVERY_NOT_FOUND` error.
    ///
    /// Stores must keep `attempts` non-decreasing and must not move a record
    /// out of a terminal status.
    fn update_delivery(&self, delivery_id: &str, update: &DeliveryUpdate) -> Result<()>;

    fn get_delivery(&self, delivery_id: &str) -> Result<Option<WebhookDelivery>>;

    /// Most recent first, optionally for one webhook, at most `limit` rows.
    fn list_deliveries(&self, webhook_id: Option<&str>, limit: usize)
    -> Result<Vec<WebhookDelivery>>;
}

/// Read access to registered webhooks.
pub trait WebhookStore: Send + Sync {
    fn find_webhook(&self, webhook_id: &str) -> Result<Option<Webhook>>;

    /// Enabled webhooks subscribed to `event` whose scope admits `project_id`.
    fn webhooks_for_event(
        &self,
        event: WebhookEventType,
        project_id: Option<&str>,
    ) -> Result<Vec<Webhook>>;
}
