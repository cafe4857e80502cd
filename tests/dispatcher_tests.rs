//! Dispatcher tests with scripted transports.
//!
//! These cover the fire-and-forget contract: callers get a pending record
//! back immediately and every background failure ends in a `failed` record.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use flux_tracker::db::Database;
use flux_tracker::error::{ErrorCode, FluxError};
use flux_tracker::types::{
    DeliveryStatus, DeliveryUpdate, NewWebhook, Webhook, WebhookDelivery, WebhookEventType,
    WebhookPayload,
};
use flux_tracker::webhooks::{
    DeliveryEngine, DeliverySettings, DeliveryStore, HttpTransport, OutboundRequest,
    TransportError, TransportResponse, WebhookDispatcher,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Replies with a fixed status after an optional per-URL delay.
struct ScriptedTransport {
    status: u16,
    slow_delay: Duration,
    calls: AtomicUsize,
    seen: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedTransport {
    fn new(status: u16) -> Self {
        Self {
            status,
            slow_delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn post(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if request.url.contains("slow") {
            tokio::time::sleep(self.slow_delay).await;
        }
        self.seen.lock().unwrap().push(request);
        Ok(TransportResponse {
            status: self.status,
            body: "scripted".to_string(),
        })
    }
}

/// Fails endpoints whose URL mentions `down` and accepts the rest.
struct RoutedTransport;

#[async_trait]
impl HttpTransport for RoutedTransport {
    async fn post(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        let status = if request.url.contains("down") { 500 } else { 200 };
        Ok(TransportResponse {
            status,
            body: String::new(),
        })
    }
}

struct PanickingTransport;

#[async_trait]
impl HttpTransport for PanickingTransport {
    async fn post(&self, _request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        panic!("transport exploded");
    }
}

/// Delegates to the database but rejects attempt bookkeeping.
struct BrokenAttemptStore {
    inner: Arc<Database>,
}

impl DeliveryStore for BrokenAttemptStore {
    fn create_delivery(
        &self,
        webhook_id: &str,
        event: WebhookEventType,
        payload: &WebhookPayload,
    ) -> Result<WebhookDelivery> {
        self.inner.create_delivery(webhook_id, event, payload)
    }

    fn update_delivery(&self, delivery_id: &str, update: &DeliveryUpdate) -> Result<()> {
        if update.attempts.is_some() {
            return Err(anyhow!("disk full"));
        }
        self.inner.update_delivery(delivery_id, update)
    }

    fn get_delivery(&self, delivery_id: &str) -> Result<Option<WebhookDelivery>> {
        self.inner.get_delivery(delivery_id)
    }

    fn list_deliveries(
        &self,
        webhook_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>> {
        self.inner.list_deliveries(webhook_id, limit)
    }
}

fn fast_settings() -> DeliverySettings {
    DeliverySettings::default().with_retry_delays(vec![Duration::from_millis(5)])
}

fn setup_db() -> Arc<Database> {
    Arc::new(Database::open_in_memory().expect("Failed to create in-memory database"))
}

fn dispatcher_with(
    db: &Arc<Database>,
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn DeliveryStore>,
) -> WebhookDispatcher {
    dispatcher_with_settings(db, transport, store, fast_settings())
}

fn dispatcher_with_settings(
    db: &Arc<Database>,
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn DeliveryStore>,
    settings: DeliverySettings,
) -> WebhookDispatcher {
    let engine = Arc::new(DeliveryEngine::new(transport, store.clone(), settings));
    WebhookDispatcher::new(engine, store, db.clone())
}

fn register(db: &Database, url: &str) -> Webhook {
    db.create_webhook(NewWebhook {
        name: url.to_string(),
        url: url.to_string(),
        secret: Some("s3cr3t".to_string()),
        events: vec![WebhookEventType::TaskCreated],
        project_id: None,
        enabled: true,
    })
    .unwrap()
}

fn payload() -> WebhookPayload {
    WebhookPayload::new(WebhookEventType::TaskCreated, json!({ "task": { "id": "t1" } }))
}

/// Poll until the record leaves `pending`.
async fn wait_for_terminal(db: &Database, delivery_id: &str) -> WebhookDelivery {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let record = db.get_delivery(delivery_id).unwrap().unwrap();
        if record.status.is_terminal() {
            return record;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "delivery {} never finished",
            delivery_id
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn handle_event_returns_pending_record_immediately() {
    let db = setup_db();
    let transport = Arc::new(ScriptedTransport {
        slow_delay: Duration::from_millis(300),
        ..ScriptedTransport::new(200)
    });
    let dispatcher = dispatcher_with(&db, transport, db.clone());
    let webhook = register(&db, "https://slow.example.com/hook");
    let payload = payload();

    let delivery = dispatcher
        .handle_webhook_event(WebhookEventType::TaskCreated, payload.clone(), webhook.clone())
        .unwrap();

    assert_eq!(delivery.status, DeliveryStatus::Pending);
    assert_eq!(delivery.attempts, 0);
    assert_ne!(delivery.id, payload.webhook_id);
    assert_eq!(delivery.webhook_id, webhook.id);
    let stored: serde_json::Value = serde_json::from_str(&delivery.payload).unwrap();
    assert_eq!(stored["webhook_id"], json!(delivery.id));
    assert_eq!(
        db.get_delivery(&delivery.id).unwrap().unwrap().status,
        DeliveryStatus::Pending
    );

    let record = wait_for_terminal(&db, &delivery.id).await;
    assert_eq!(record.status, DeliveryStatus::Success);
    assert_eq!(record.attempts, 1);
}

#[tokio::test]
async fn failing_endpoint_ends_failed_after_max_attempts() {
    let db = setup_db();
    let transport = Arc::new(ScriptedTransport::new(500));
    let dispatcher = dispatcher_with(&db, transport.clone(), db.clone());
    let webhook = register(&db, "https://down.example.com/hook");

    let (delivery, done) = dispatcher
        .dispatch(WebhookEventType::TaskCreated, payload(), webhook)
        .unwrap();
    done.await.unwrap();

    let record = db.get_delivery(&delivery.id).unwrap().unwrap();
    assert_eq!(record.status, DeliveryStatus::Failed);
    assert_eq!(record.attempts, 3);
    assert_eq!(record.response_code, Some(500));
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn panicking_transport_marks_record_failed() {
    let db = setup_db();
    let dispatcher = dispatcher_with(&db, Arc::new(PanickingTransport), db.clone());
    let webhook = register(&db, "https://boom.example.com/hook");

    let (delivery, done) = dispatcher
        .dispatch(WebhookEventType::TaskCreated, payload(), webhook)
        .unwrap();
    done.await.unwrap();

    let record = db.get_delivery(&delivery.id).unwrap().unwrap();
    assert_eq!(record.status, DeliveryStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("transport exploded"));
}

#[tokio::test]
async fn store_error_during_attempt_marks_record_failed() {
    let db = setup_db();
    let store = Arc::new(BrokenAttemptStore { inner: db.clone() });
    let dispatcher = dispatcher_with(&db, Arc::new(ScriptedTransport::new(200)), store);
    let webhook = register(&db, "https://ok.example.com/hook");

    let (delivery, done) = dispatcher
        .dispatch(WebhookEventType::TaskCreated, payload(), webhook)
        .unwrap();
    done.await.unwrap();

    let record = db.get_delivery(&delivery.id).unwrap().unwrap();
    assert_eq!(record.status, DeliveryStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("disk full"));
}

#[tokio::test]
async fn slow_webhook_does_not_delay_others() {
    let db = setup_db();
    let transport = Arc::new(ScriptedTransport {
        slow_delay: Duration::from_secs(2),
        ..ScriptedTransport::new(200)
    });
    let dispatcher = dispatcher_with(&db, transport, db.clone());
    let slow = register(&db, "https://slow.example.com/hook");
    let fast = register(&db, "https://fast.example.com/hook");

    let (slow_delivery, _slow_done) = dispatcher
        .dispatch(WebhookEventType::TaskCreated, payload(), slow)
        .unwrap();
    let (fast_delivery, fast_done) = dispatcher
        .dispatch(WebhookEventType::TaskCreated, payload(), fast)
        .unwrap();

    tokio::time::timeout(Duration::from_millis(500), fast_done)
        .await
        .expect("fast delivery blocked by slow one")
        .unwrap();

    let fast_record = db.get_delivery(&fast_delivery.id).unwrap().unwrap();
    assert_eq!(fast_record.status, DeliveryStatus::Success);
    let slow_record = db.get_delivery(&slow_delivery.id).unwrap().unwrap();
    assert_eq!(slow_record.status, DeliveryStatus::Pending);
}

#[tokio::test]
async fn same_payload_dispatched_twice_gets_distinct_records() {
    let db = setup_db();
    let transport = Arc::new(ScriptedTransport::new(200));
    let dispatcher = dispatcher_with(&db, transport.clone(), db.clone());
    let a = register(&db, "https://a.example.com/hook");
    let b = register(&db, "https://b.example.com/hook");
    let payload = payload();

    let (first, first_done) = dispatcher
        .dispatch(WebhookEventType::TaskCreated, payload.clone(), a.clone())
        .unwrap();
    let (second, second_done) = dispatcher
        .dispatch(WebhookEventType::TaskCreated, payload.clone(), b)
        .unwrap();
    let (again, again_done) = dispatcher
        .dispatch(WebhookEventType::TaskCreated, payload, a)
        .unwrap();
    first_done.await.unwrap();
    second_done.await.unwrap();
    again_done.await.unwrap();

    assert_ne!(first.id, second.id);
    assert_ne!(first.id, again.id);
    for id in [&first.id, &second.id, &again.id] {
        assert_eq!(db.get_delivery(id).unwrap().unwrap().status, DeliveryStatus::Success);
    }
    assert_eq!(transport.calls(), 3);

    // The delivery header and envelope name the record they belong to.
    let seen = transport.seen.lock().unwrap();
    let mut sent: Vec<_> = seen
        .iter()
        .map(|r| r.header("x-flux-delivery").unwrap().to_string())
        .collect();
    sent.sort();
    let mut expected = vec![first.id, second.id, again.id];
    expected.sort();
    assert_eq!(sent, expected);
    for request in seen.iter() {
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body["webhook_id"].as_str(), request.header("x-flux-delivery"));
    }
}

#[tokio::test]
async fn retry_backoff_does_not_delay_others() {
    let db = setup_db();
    let settings = DeliverySettings::default().with_retry_delays(vec![Duration::from_secs(5)]);
    let dispatcher = dispatcher_with_settings(&db, Arc::new(RoutedTransport), db.clone(), settings);
    let down = register(&db, "https://down.example.com/hook");
    let up = register(&db, "https://up.example.com/hook");

    let (down_delivery, _down_done) = dispatcher
        .dispatch(WebhookEventType::TaskCreated, payload(), down)
        .unwrap();
    let (up_delivery, up_done) = dispatcher
        .dispatch(WebhookEventType::TaskCreated, payload(), up)
        .unwrap();

    tokio::time::timeout(Duration::from_secs(1), up_done)
        .await
        .expect("delivery blocked by another webhook's backoff")
        .unwrap();

    let up_record = db.get_delivery(&up_delivery.id).unwrap().unwrap();
    assert_eq!(up_record.status, DeliveryStatus::Success);

    // The failing series is sleeping before its second attempt.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    let down_record = loop {
        let record = db.get_delivery(&down_delivery.id).unwrap().unwrap();
        if record.attempts >= 1 || tokio::time::Instant::now() >= deadline {
            break record;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    assert_eq!(down_record.status, DeliveryStatus::Pending);
    assert_eq!(down_record.attempts, 1);
    assert_eq!(down_record.response_code, Some(500));
}

#[tokio::test]
async fn dispatch_outside_runtime_is_an_error() {
    let db = setup_db();
    let dispatcher = dispatcher_with(&db, Arc::new(ScriptedTransport::new(200)), db.clone());
    let webhook = register(&db, "https://ok.example.com/hook");

    // A plain thread has no tokio runtime to spawn onto.
    let result = std::thread::spawn(move || {
        dispatcher
            .handle_webhook_event(WebhookEventType::TaskCreated, payload(), webhook)
            .map(|_| ())
    })
    .join()
    .unwrap();

    assert!(result.is_err());
}

#[tokio::test]
async fn test_delivery_sends_once_and_records_nothing() {
    let db = setup_db();
    let transport = Arc::new(ScriptedTransport::new(500));
    let dispatcher = dispatcher_with(&db, transport.clone(), db.clone());
    let webhook = register(&db, "https://down.example.com/hook");

    let outcome = dispatcher.test_webhook_delivery(&webhook).await;

    assert!(!outcome.success);
    assert_eq!(outcome.status_code, Some(500));
    assert_eq!(transport.calls(), 1);
    assert!(db.list_deliveries(None, 50).unwrap().is_empty());

    let seen = transport.seen.lock().unwrap();
    let body: serde_json::Value = serde_json::from_slice(&seen[0].body).unwrap();
    assert_eq!(body["event"], json!("task.created"));
    assert_eq!(body["webhook_id"], json!(webhook.id));
    assert_eq!(body["data"]["task"]["title"], json!("Test Task"));
    assert!(seen[0].header("x-flux-signature").is_some());
}

#[tokio::test]
async fn test_webhook_unknown_id_is_not_found() {
    let db = setup_db();
    let dispatcher = dispatcher_with(&db, Arc::new(ScriptedTransport::new(200)), db.clone());

    let err = dispatcher.test_webhook("missing").await.unwrap_err();
    assert_eq!(FluxError::from(err).code, ErrorCode::WebhookNotFound);
}

#[tokio::test]
async fn emit_fans_out_to_interested_webhooks() {
    let db = setup_db();
    let transport = Arc::new(ScriptedTransport::new(200));
    let dispatcher = dispatcher_with(&db, transport.clone(), db.clone());
    let a = register(&db, "https://a.example.com/hook");
    let b = register(&db, "https://b.example.com/hook");
    db.create_webhook(NewWebhook {
        name: "deletes".to_string(),
        url: "https://c.example.com/hook".to_string(),
        secret: None,
        events: vec![WebhookEventType::TaskDeleted],
        project_id: None,
        enabled: true,
    })
    .unwrap();

    let queued = dispatcher
        .emit(WebhookEventType::TaskCreated, Some("p1"), json!({ "task": { "id": "t1" } }))
        .unwrap();

    assert_eq!(queued.len(), 2);
    let mut targets: Vec<_> = queued.iter().map(|d| d.webhook_id.clone()).collect();
    targets.sort();
    let mut expected = vec![a.id, b.id];
    expected.sort();
    assert_eq!(targets, expected);
    // Each webhook gets its own delivery id.
    assert_ne!(queued[0].id, queued[1].id);

    for delivery in &queued {
        let record = wait_for_terminal(&db, &delivery.id).await;
        assert_eq!(record.status, DeliveryStatus::Success);
    }
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn recent_deliveries_newest_first_with_limit() {
    let db = setup_db();
    let dispatcher = dispatcher_with(&db, Arc::new(ScriptedTransport::new(200)), db.clone());
    let a = register(&db, "https://a.example.com/hook");
    let b = register(&db, "https://b.example.com/hook");

    let mut ids = Vec::new();
    for _ in 0..3 {
        let (delivery, done) = dispatcher
            .dispatch(WebhookEventType::TaskCreated, payload(), a.clone())
            .unwrap();
        done.await.unwrap();
        ids.push(delivery.id);
    }
    let (other, done) = dispatcher
        .dispatch(WebhookEventType::TaskCreated, payload(), b.clone())
        .unwrap();
    done.await.unwrap();

    let recent = dispatcher.get_recent_deliveries(Some(&a.id), Some(2)).unwrap();
    let recent_ids: Vec<_> = recent.iter().map(|d| d.id.clone()).collect();
    assert_eq!(recent_ids, vec![ids[2].clone(), ids[1].clone()]);

    let all = dispatcher.get_recent_deliveries(None, None).unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].id, other.id);
}
