//! Scheduled retry queue
//!
//! A concurrent `{payment -> due time}` map; the sweeper fires due
//! entries and hands them to the retry service. One failing entry never
//! stops the rest of the sweep. Entries are removed when fired; a retry
//! that wants another round schedules itself again.

use crate::{RetryPolicy, RetryService};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use paygate_types::PaymentId;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
struct ScheduledRetry {
    due_at: DateTime<Utc>,
    policy_name: String,
}

/// The scheduled retry queue
pub struct RetryScheduler {
    service: Arc<RetryService>,
    queue: DashMap<PaymentId, ScheduledRetry>,
}

impl RetryScheduler {
    pub fn new(service: Arc<RetryService>) -> Self {
        Self {
            service,
            queue: DashMap::new(),
        }
    }

    /// Enqueue a retry; a later schedule for the same payment replaces
    /// the earlier one
    pub fn schedule(&self, payment_id: PaymentId, due_at: DateTime<Utc>, policy: &RetryPolicy) {
        debug!(payment = %payment_id, %due_at, policy = %policy.name, "retry scheduled");
        self.queue.insert(
            payment_id,
            ScheduledRetry {
                due_at,
                policy_name: policy.name.clone(),
            },
        );
    }

    pub fn cancel(&self, payment_id: &PaymentId) -> bool {
        self.queue.remove(payment_id).is_some()
    }

    /// Whether a retry is already pending for this payment
    pub fn is_scheduled(&self, payment_id: &PaymentId) -> bool {
        self.queue.contains_key(payment_id)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Fire every due entry; returns how many were attempted
    pub async fn run_due(&self, now: DateTime<Utc>) -> usize {
        let due: Vec<(PaymentId, ScheduledRetry)> = self
            .queue
            .iter()
            .filter(|entry| entry.value().due_at <= now)
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut fired = 0;
        for (payment_id, scheduled) in due {
            self.queue.remove(&payment_id);
            let policy = RetryPolicy::by_name(&scheduled.policy_name)
                .unwrap_or_else(RetryPolicy::standard);
            fired += 1;
            // Failures are logged and isolated; the next entry still runs.
            if let Err(err) = self.service.retry(&payment_id, &policy).await {
                warn!(payment = %payment_id, "scheduled retry failed: {err}");
            }
        }
        fired
    }
}
