//! Signed HTTP delivery with bounded retries.

use super::signature::signature_header;
use super::store::DeliveryStore;
use super::transport::{HttpTransport, OutboundRequest, ReqwestTransport};
use crate::config::WebhookConfig;
use crate::types::{DeliveryOutcome, DeliveryUpdate, Webhook, WebhookPayload, now_rfc3339};
use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const HEADER_EVENT: &str = "X-Flux-Event";
pub const HEADER_DELIVERY: &str = "X-Flux-Delivery";
pub const HEADER_TIMESTAMP: &str = "X-Flux-Timestamp";
pub const HEADER_SIGNATURE: &str = "X-Flux-Signature";

/// Resolves the signing key for a webhook.
pub trait SecretSource: Send + Sync {
    fn secret_for(&self, webhook: &Webhook) -> Option<String>;
}

/// Signs with the secret stored on the webhook itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebhookSecret;

impl SecretSource for WebhookSecret {
    fn secret_for(&self, webhook: &Webhook) -> Option<String> {
        webhook.secret.clone().filter(|s| !s.is_empty())
    }
}

/// Engine settings, fixed at construction.
#[derive(Clone)]
pub struct DeliverySettings {
    pub timeout: Duration,
    /// Total attempts per delivery, including the first.
    pub max_retries: u32,
    pub retry_delays: Vec<Duration>,
    pub response_body_limit: usize,
    pub user_agent: String,
    pub secrets: Arc<dyn SecretSource>,
}

impl fmt::Debug for DeliverySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliverySettings")
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_delays", &self.retry_delays)
            .field("response_body_limit", &self.response_body_limit)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self::from_config(&WebhookConfig::default())
    }
}

impl DeliverySettings {
    pub fn from_config(config: &WebhookConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_retries: config.max_retries,
            retry_delays: config.retry_delays(),
            response_body_limit: config.response_body_limit,
            user_agent: config.user_agent.clone(),
            secrets: Arc::new(WebhookSecret),
        }
    }

    pub fn with_secret_source(mut self, secrets: Arc<dyn SecretSource>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// Delay after the failed attempt with index `attempt`. Indexes past the
    /// schedule reuse its last entry.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let idx = attempt as usize;
        self.retry_delays
            .get(idx)
            .or_else(|| self.retry_delays.last())
            .copied()
            .unwrap_or_default()
    }

    /// Whether another attempt follows a failure of attempt index `attempt`.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) < self.max_retries
    }
}

/// Cut `body` to at most `limit` bytes on a character boundary.
pub fn truncate_body(mut body: String, limit: usize) -> String {
    if body.len() > limit {
        let mut end = limit;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

/// Performs delivery attempts and records their results.
pub struct DeliveryEngine {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn DeliveryStore>,
    settings: DeliverySettings,
}

impl DeliveryEngine {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn DeliveryStore>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            transport,
            store,
            settings,
        }
    }

    /// Engine sending through a default `reqwest` client.
    pub fn with_reqwest(store: Arc<dyn DeliveryStore>, settings: DeliverySettings) -> Self {
        Self::new(Arc::new(ReqwestTransport::new()), store, settings)
    }

    pub fn settings(&self) -> &DeliverySettings {
        &self.settings
    }

    /// Serialize the payload once and attach headers. The signature, when
    /// present, covers exactly `body`.
    pub fn build_request(
        &self,
        webhook: &Webhook,
        payload: &WebhookPayload,
    ) -> serde_json::Result<OutboundRequest> {
        let body = serde_json::to_vec(payload)?;

        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("User-Agent".to_string(), self.settings.user_agent.clone()),
            (HEADER_EVENT.to_string(), payload.event.as_str().to_string()),
            (HEADER_DELIVERY.to_string(), payload.webhook_id.clone()),
            (HEADER_TIMESTAMP.to_string(), payload.timestamp.clone()),
        ];

        let signature = self
            .settings
            .secrets
            .secret_for(webhook)
            .and_then(|secret| signature_header(&body, &secret));
        if let Some(signature) = signature {
            headers.push((HEADER_SIGNATURE.to_string(), signature));
        }

        Ok(OutboundRequest {
            url: webhook.url.clone(),
            headers,
            body,
            timeout: self.settings.timeout,
        })
    }

    /// One POST attempt. Every failure is reported in the outcome.
    pub async fn deliver(&self, webhook: &Webhook, payload: &WebhookPayload) -> DeliveryOutcome {
        let request = match self.build_request(webhook, payload) {
            Ok(request) => request,
            Err(e) => {
                return DeliveryOutcome::failure(format!("failed to serialize payload: {}", e));
            }
        };

        match self.transport.post(request).await {
            Ok(response) => DeliveryOutcome {
                success: (200..300).contains(&response.status),
                status_code: Some(response.status),
                body: Some(truncate_body(
                    response.body,
                    self.settings.response_body_limit,
                )),
                error: None,
            },
            Err(e) => DeliveryOutcome::failure(e.to_string()),
        }
    }

    /// Attempt delivery until success or the attempt budget runs out,
    /// recording every attempt on `delivery_id`.
    ///
    /// `first_attempt` is the zero-based index of the first attempt made here;
    /// a fresh series passes 0, a resumed one the number of attempts already
    /// recorded. Attempts are strictly sequential: the next one starts only
    /// after the previous record update and the backoff delay. Errors returned
    /// here come from the store, not from delivery.
    pub async fn deliver_with_retry(
        &self,
        webhook: &Webhook,
        payload: &WebhookPayload,
        delivery_id: &str,
        first_attempt: u32,
    ) -> Result<()> {
        let mut attempt = first_attempt;

        loop {
            let outcome = self.deliver(webhook, payload).await;

            self.store
                .update_delivery(delivery_id, &DeliveryUpdate::attempt(attempt + 1, &outcome))?;

            if outcome.success {
                self.store
                    .update_delivery(delivery_id, &DeliveryUpdate::succeeded(now_rfc3339()))?;
                info!(
                    webhook_id = %webhook.id,
                    delivery_id = %delivery_id,
                    attempts = attempt + 1,
                    status_code = ?outcome.status_code,
                    "Webhook delivered"
                );
                return Ok(());
            }

            if !self.settings.should_retry(attempt) {
                self.store
                    .update_delivery(delivery_id, &DeliveryUpdate::failed())?;
                warn!(
                    webhook_id = %webhook.id,
                    delivery_id = %delivery_id,
                    attempts = attempt + 1,
                    status_code = ?outcome.status_code,
                    error = ?outcome.error,
                    "Webhook delivery failed, retries exhausted"
                );
                return Ok(());
            }

            let delay = self.settings.retry_delay(attempt);
            debug!(
                webhook_id = %webhook.id,
                delivery_id = %delivery_id,
                attempt = attempt + 1,
                status_code = ?outcome.status_code,
                error = ?outcome.error,
                delay_ms = delay.as_millis() as u64,
                "Webhook attempt failed, scheduling retry"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_schedule() {
        let settings = DeliverySettings::default();
        assert_eq!(settings.retry_delay(0), Duration::from_secs(1));
        assert_eq!(settings.retry_delay(1), Duration::from_secs(5));
        assert_eq!(settings.retry_delay(2), Duration::from_secs(30));
        // Clamped to the last entry
        assert_eq!(settings.retry_delay(7), Duration::from_secs(30));
    }

    #[test]
    fn test_empty_schedule_has_no_delay() {
        let settings = DeliverySettings::default().with_retry_delays(vec![]);
        assert_eq!(settings.retry_delay(0), Duration::ZERO);
    }

    #[test]
    fn test_should_retry_bounds() {
        let settings = DeliverySettings::default();
        assert!(settings.should_retry(0));
        assert!(settings.should_retry(1));
        assert!(!settings.should_retry(2));

        let single = DeliverySettings {
            max_retries: 0,
            ..DeliverySettings::default()
        };
        assert!(!single.should_retry(0));
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("short".into(), 1000), "short");
        assert_eq!(truncate_body("a".repeat(1500), 1000).len(), 1000);
        // "é" is two bytes; never split it
        let body = format!("{}é", "a".repeat(999));
        assert_eq!(truncate_body(body, 1000), "a".repeat(999));
    }

    #[test]
    fn test_webhook_secret_ignores_empty() {
        let mut webhook = Webhook {
            id: "w".into(),
            name: "w".into(),
            url: "http://localhost".into(),
            secret: Some(String::new()),
            events: vec![],
            project_id: None,
            enabled: true,
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert_eq!(WebhookSecret.secret_for(&webhook), None);
        webhook.secret = Some("k".into());
        assert_eq!(WebhookSecret.secret_for(&webhook).as_deref(), Some("k"));
    }
}
