//! Webhook notification dispatch
//!
//! Drains the event queue and delivers each event to the owning team's
//! webhook endpoint. Payloads mirror the API response shape plus the new
//! status, and are signed with the team's token scheme. Each send has its
//! own bounded retry budget; an exhausted event is dropped with an audit
//! record rather than blocking the queue.

use paygate_audit::{AuditAction, AuditEntry, AuditLog};
use paygate_auth::{generate_token, TOKEN_KEY};
use paygate_lifecycle::{EventQueue, PaymentEvent};
use paygate_store::TeamStore;
use paygate_types::{GatewayError, Result};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Sends per dispatch before an event is dropped
pub const MAX_DELIVERY_ATTEMPTS: u32 = 3;

/// Transport for webhook deliveries
#[async_trait::async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, url: &str, payload: &Value) -> Result<()>;
}

/// HTTP transport
pub struct HttpWebhookSender {
    client: reqwest::Client,
}

impl HttpWebhookSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpWebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, url: &str, payload: &Value) -> Result<()> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| GatewayError::transient(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(GatewayError::transient(format!(
                "webhook endpoint answered {}",
                response.status()
            )))
        }
    }
}

/// The notification worker body
pub struct WebhookDispatcher {
    queue: EventQueue,
    teams: Arc<dyn TeamStore>,
    audit: Arc<dyn AuditLog>,
    sender: Arc<dyn WebhookSender>,
    /// Delay between delivery attempts of one event
    retry_delay: Duration,
}

impl WebhookDispatcher {
    pub fn new(
        queue: EventQueue,
        teams: Arc<dyn TeamStore>,
        audit: Arc<dyn AuditLog>,
        sender: Arc<dyn WebhookSender>,
    ) -> Self {
        Self {
            queue,
            teams,
            audit,
            sender,
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Signed payload mirroring the API response shape plus the new status
    pub fn payload(event: &PaymentEvent, password: &str) -> Value {
        let mut params = Map::new();
        params.insert("TeamSlug".into(), json!(event.team_slug));
        params.insert("OrderId".into(), json!(event.order_id));
        params.insert("PaymentId".into(), json!(event.payment_ref));
        params.insert("Amount".into(), json!(event.amount));
        params.insert("Currency".into(), json!(event.currency));
        params.insert("Status".into(), json!(event.to_status.as_str()));
        params.insert("Success".into(), json!(event.error_code.is_none()));
        params.insert(
            "ErrorCode".into(),
            json!(event.error_code.clone().unwrap_or_else(|| "0".into())),
        );
        let token = generate_token(&params, password);
        params.insert(TOKEN_KEY.into(), json!(token));
        Value::Object(params)
    }

    /// Drain and deliver up to `batch` pending events
    pub async fn dispatch_pending(&self, batch: usize) -> Result<usize> {
        let events = self.queue.drain(batch).await;
        let mut delivered = 0;
        for event in events {
            match self.deliver(&event).await {
                Ok(true) => delivered += 1,
                Ok(false) => {}
                Err(err) => warn!(payment = %event.payment_ref, "webhook delivery abandoned: {err}"),
            }
        }
        Ok(delivered)
    }

    /// Deliver one event; `Ok(false)` means the team has no endpoint
    async fn deliver(&self, event: &PaymentEvent) -> Result<bool> {
        let team = self.teams.get_team_by_slug(&event.team_slug).await?;
        let Some(url) = team.webhook_url.as_deref() else {
            debug!(team = %event.team_slug, "no webhook endpoint configured");
            return Ok(false);
        };
        let payload = Self::payload(event, &team.password);

        let mut last_err = None;
        for attempt in 1..=MAX_DELIVERY_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(self.retry_delay).await;
            }
            match self.sender.send(url, &payload).await {
                Ok(()) => {
                    self.audit
                        .append(
                            AuditEntry::new(
                                AuditAction::NotificationSent,
                                event.payment_ref.clone(),
                                "payment",
                            )
                            .with_team(&event.team_slug)
                            .with_details(format!("{} after {attempt} attempt(s)", event.to_status))
                            .seal(),
                        )
                        .await?;
                    return Ok(true);
                }
                Err(err) => {
                    debug!(payment = %event.payment_ref, attempt, "webhook send failed: {err}");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| GatewayError::internal("webhook delivery failed")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paygate_audit::InMemoryAuditLog;
    use paygate_auth::verify_token;
    use paygate_lifecycle::EventPublisher;
    use paygate_store::MemoryStore;
    use paygate_types::{PaymentId, PaymentStatus, Team};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    struct ScriptedSender {
        failures: AtomicU32,
        sent: Mutex<Vec<Value>>,
    }

    impl ScriptedSender {
        fn failing(n: u32) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicU32::new(n),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl WebhookSender for ScriptedSender {
        async fn send(&self, _url: &str, payload: &Value) -> Result<()> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(GatewayError::transient("endpoint down"));
            }
            self.sent.lock().await.push(payload.clone());
            Ok(())
        }
    }

    fn event(team_slug: &str) -> PaymentEvent {
        PaymentEvent {
            payment_id: PaymentId::new(),
            payment_ref: "pay_test".into(),
            team_slug: team_slug.into(),
            order_id: "O-1".into(),
            amount: 10_000,
            currency: "RUB".into(),
            from_status: PaymentStatus::Authorizing,
            to_status: PaymentStatus::Authorized,
            occurred_at: chrono::Utc::now(),
            error_code: None,
        }
    }

    async fn dispatcher(sender: Arc<ScriptedSender>) -> (WebhookDispatcher, EventQueue) {
        let store = Arc::new(MemoryStore::new());
        let mut team = Team::new("acme", "Acme", "secret");
        team.webhook_url = Some("https://merchant.example/hook".into());
        store.insert_team(&team).await.unwrap();
        let queue = EventQueue::new();
        let dispatcher = WebhookDispatcher::new(
            queue.clone(),
            store,
            Arc::new(InMemoryAuditLog::new()),
            sender,
        )
        .with_retry_delay(Duration::from_millis(1));
        (dispatcher, queue)
    }

    #[tokio::test]
    async fn payload_is_signed_and_carries_status() {
        let payload = WebhookDispatcher::payload(&event("acme"), "secret");
        let map = payload.as_object().unwrap();
        assert_eq!(map.get("Status").unwrap(), "AUTHORIZED");
        assert_eq!(map.get("Success").unwrap(), true);
        let token = map.get("Token").unwrap().as_str().unwrap();
        assert!(verify_token(map, "secret", token));
    }

    #[tokio::test]
    async fn delivery_retries_within_budget() {
        let sender = ScriptedSender::failing(2);
        let (dispatcher, queue) = dispatcher(sender.clone()).await;
        queue.publish(event("acme")).await.unwrap();

        assert_eq!(dispatcher.dispatch_pending(10).await.unwrap(), 1);
        assert_eq!(sender.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn exhausted_event_is_dropped_not_requeued() {
        let sender = ScriptedSender::failing(u32::MAX);
        let (dispatcher, queue) = dispatcher(sender).await;
        queue.publish(event("acme")).await.unwrap();

        assert_eq!(dispatcher.dispatch_pending(10).await.unwrap(), 0);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn team_without_endpoint_is_skipped() {
        let sender = ScriptedSender::failing(0);
        let store = Arc::new(MemoryStore::new());
        store.insert_team(&Team::new("acme", "Acme", "secret")).await.unwrap();
        let queue = EventQueue::new();
        let dispatcher = WebhookDispatcher::new(
            queue.clone(),
            store,
            Arc::new(InMemoryAuditLog::new()),
            sender.clone(),
        );
        queue.publish(event("acme")).await.unwrap();
        assert_eq!(dispatcher.dispatch_pending(10).await.unwrap(), 0);
        assert!(sender.sent.lock().await.is_empty());
    }
}
