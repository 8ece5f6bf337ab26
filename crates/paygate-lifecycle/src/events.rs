//! Payment events
//!
//! Every successful lifecycle operation publishes an event; the default
//! publisher feeds the in-process queue the notification worker drains
//! into merchant webhooks.

use chrono::{DateTime, Utc};
use paygate_types::{PaymentId, PaymentStatus, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A state change visible to the merchant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub payment_id: PaymentId,
    /// Merchant-facing payment reference
    pub payment_ref: String,
    pub team_slug: String,
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
    pub from_status: PaymentStatus,
    pub to_status: PaymentStatus,
    pub occurred_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// Sink for payment events
#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: PaymentEvent) -> Result<()>;
}

/// Publisher that drops everything, for tests and headless tools
pub struct NullPublisher;

#[async_trait::async_trait]
impl EventPublisher for NullPublisher {
    async fn publish(&self, _event: PaymentEvent) -> Result<()> {
        Ok(())
    }
}

/// In-process queue bridging the lifecycle to the notification worker
#[derive(Clone)]
pub struct EventQueue {
    pending: Arc<RwLock<VecDeque<PaymentEvent>>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(RwLock::new(VecDeque::new())),
        }
    }

    /// Take up to `max` pending events
    pub async fn drain(&self, max: usize) -> Vec<PaymentEvent> {
        let mut pending = self.pending.write().await;
        let n = pending.len().min(max);
        pending.drain(..n).collect()
    }

    /// Put an event back at the front after a failed delivery
    pub async fn requeue(&self, event: PaymentEvent) {
        self.pending.write().await.push_front(event);
    }

    pub async fn len(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.read().await.is_empty()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EventPublisher for EventQueue {
    async fn publish(&self, event: PaymentEvent) -> Result<()> {
        self.pending.write().await.push_back(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(order: &str) -> PaymentEvent {
        PaymentEvent {
            payment_id: PaymentId::new(),
            payment_ref: "pay_x".into(),
            team_slug: "acme".into(),
            order_id: order.into(),
            amount: 100,
            currency: "RUB".into(),
            from_status: PaymentStatus::Init,
            to_status: PaymentStatus::New,
            occurred_at: Utc::now(),
            error_code: None,
        }
    }

    #[tokio::test]
    async fn queue_preserves_order_and_requeues_front() {
        let queue = EventQueue::new();
        queue.publish(event("O-1")).await.unwrap();
        queue.publish(event("O-2")).await.unwrap();
        queue.publish(event("O-3")).await.unwrap();

        let batch = queue.drain(2).await;
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].order_id, "O-1");

        queue.requeue(batch[1].clone()).await;
        let batch = queue.drain(10).await;
        assert_eq!(batch[0].order_id, "O-2");
        assert_eq!(batch[1].order_id, "O-3");
        assert!(queue.is_empty().await);
    }
}
