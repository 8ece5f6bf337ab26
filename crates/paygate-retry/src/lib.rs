//! Paygate Retry - Scheduled retries with bounded backoff
//!
//! The retry service re-drives failed payments through a processing
//! delegate under the payment's retry lease. Attempt counts are
//! cumulative across invocations and bounded by the selected policy;
//! exhausted payments land on the dead-letter list.

pub mod policy;
pub mod scheduler;

pub use policy::{RetryPolicy, HIGH_VALUE_THRESHOLD};
pub use scheduler::RetryScheduler;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashSet;
use paygate_audit::{AuditAction, AuditEntry, AuditLog};
use paygate_lock::{LockManager, DEFAULT_LOCK_EXPIRY};
use paygate_store::PaymentStore;
use paygate_types::{GatewayError, Payment, PaymentId, Result, RetryAttempt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Payments older than this are never retried
pub const MAX_RETRY_AGE_HOURS: i64 = 24;

/// Delegate that re-drives one payment; in production this is the
/// lifecycle's authorize path
#[async_trait::async_trait]
pub trait RetryProcessor: Send + Sync {
    async fn process(&self, payment: &Payment) -> Result<()>;
}

/// Aggregate result of one `retry` invocation
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub success: bool,
    /// Attempts executed in this invocation
    pub attempts_used: u32,
    /// Attempts recorded across all invocations
    pub total_attempts: u32,
    pub total_duration_ms: u64,
    pub attempts: Vec<RetryAttempt>,
}

/// The retry service
pub struct RetryService {
    store: Arc<dyn PaymentStore>,
    locks: Arc<LockManager>,
    audit: Arc<dyn AuditLog>,
    processor: Arc<dyn RetryProcessor>,
    dead_letter: DashSet<PaymentId>,
}

impl RetryService {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        locks: Arc<LockManager>,
        audit: Arc<dyn AuditLog>,
        processor: Arc<dyn RetryProcessor>,
    ) -> Self {
        Self {
            store,
            locks,
            audit,
            processor,
            dead_letter: DashSet::new(),
        }
    }

    /// Payments that exhausted their policy without success
    pub fn dead_letters(&self) -> Vec<PaymentId> {
        self.dead_letter.iter().map(|id| *id).collect()
    }

    /// Execute retries for one payment under its retry lease
    pub async fn retry(&self, payment_id: &PaymentId, policy: &RetryPolicy) -> Result<RetryOutcome> {
        let resource = format!("payment:retry:{}", payment_id.as_uuid());
        let Some(lease) = self.locks.acquire(&resource, DEFAULT_LOCK_EXPIRY, None).await else {
            return Err(GatewayError::LockConflict { resource });
        };
        let result = self.retry_locked(payment_id, policy).await;
        self.locks.release(lease);
        result
    }

    async fn retry_locked(&self, payment_id: &PaymentId, policy: &RetryPolicy) -> Result<RetryOutcome> {
        let payment = self.store.get_payment(payment_id).await?;

        if payment.status.is_success() || payment.status.is_terminal() {
            return Err(GatewayError::validation(
                "status",
                format!("{} is not retryable", payment.status),
            ));
        }
        if Utc::now() - payment.created_at > ChronoDuration::hours(MAX_RETRY_AGE_HOURS) {
            return Err(GatewayError::validation("created_at", "payment is older than 24h"));
        }
        let prior = self.store.retry_attempts_for(payment_id).await?.len() as u32;
        if prior >= policy.max_attempts {
            return Err(GatewayError::validation(
                "attempts",
                format!("policy {} allows {} attempts", policy.name, policy.max_attempts),
            ));
        }
        match &payment.error_code {
            Some(code) if policy.is_retryable(code) => {}
            Some(code) => {
                return Err(GatewayError::validation(
                    "error_code",
                    format!("{code} is not retryable under policy {}", policy.name),
                ))
            }
            None => {
                return Err(GatewayError::validation("error_code", "payment has no recorded failure"))
            }
        }

        let started = Instant::now();
        let mut attempts = Vec::new();
        let mut success = false;

        for attempt_number in prior + 1..=policy.max_attempts {
            let in_call_index = attempts.len() as u32;
            if in_call_index > 0 {
                tokio::time::sleep(policy.delay_for(in_call_index)).await;
            }

            let payment = self.store.get_payment(payment_id).await?;
            let status_before = payment.status;
            let attempt_started = Instant::now();
            let outcome = self.processor.process(&payment).await;
            let duration_ms = attempt_started.elapsed().as_millis() as u64;
            let status_after = self
                .store
                .get_payment(payment_id)
                .await
                .map(|p| p.status)
                .unwrap_or(status_before);

            let (is_success, error_code, error_message) = match &outcome {
                Ok(()) => (true, None, None),
                Err(err) => (
                    false,
                    Some(err.error_code().to_string()),
                    Some(err.to_string()),
                ),
            };
            let record = RetryAttempt {
                payment_id: *payment_id,
                attempt_number,
                attempted_at: Utc::now(),
                is_success,
                error_code: error_code.clone(),
                error_message,
                duration_ms,
                status_before,
                status_after,
                policy_name: policy.name.clone(),
                metadata: HashMap::new(),
            };
            self.store.append_retry_attempt(&record).await?;
            self.audit
                .append(
                    AuditEntry::new(
                        AuditAction::RetryExecuted { attempt: attempt_number },
                        payment_id.to_prefixed_string(),
                        "payment",
                    )
                    .with_details(format!(
                        "attempt {attempt_number}/{} under {}: {}",
                        policy.max_attempts,
                        policy.name,
                        if is_success { "success" } else { "failure" }
                    ))
                    .seal(),
                )
                .await?;
            attempts.push(record);

            match outcome {
                Ok(()) => {
                    success = true;
                    break;
                }
                Err(err) if !policy.is_retryable(err.error_code()) => {
                    info!(payment = %payment_id, "stopping retries on non-retryable {}", err.error_code());
                    break;
                }
                Err(_) => {}
            }
        }

        let total_attempts = prior + attempts.len() as u32;
        if !success && total_attempts >= policy.max_attempts {
            warn!(payment = %payment_id, "retry budget exhausted, dead-lettering");
            self.dead_letter.insert(*payment_id);
            self.audit
                .append(
                    AuditEntry::new(
                        AuditAction::RetryDeadLettered,
                        payment_id.to_prefixed_string(),
                        "payment",
                    )
                    .with_details(format!("{total_attempts} attempts under {}", policy.name))
                    .seal(),
                )
                .await?;
        }

        Ok(RetryOutcome {
            success,
            attempts_used: attempts.len() as u32,
            total_attempts,
            total_duration_ms: started.elapsed().as_millis() as u64,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paygate_audit::InMemoryAuditLog;
    use paygate_store::MemoryStore;
    use paygate_store::TeamStore;
    use paygate_types::{NewPayment, PaymentStatus, Team};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct ScriptedProcessor {
        /// Failures to produce before succeeding; u32::MAX never succeeds
        failures: AtomicU32,
        calls: AtomicU32,
    }

    impl ScriptedProcessor {
        fn failing(n: u32) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicU32::new(n),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl RetryProcessor for ScriptedProcessor {
        async fn process(&self, _payment: &Payment) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures.load(Ordering::SeqCst);
            if left == 0 {
                return Ok(());
            }
            if left != u32::MAX {
                self.failures.fetch_sub(1, Ordering::SeqCst);
            }
            Err(GatewayError::transient("ServiceTemporarilyUnavailable"))
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        let mut policy = RetryPolicy::standard();
        policy.max_attempts = max_attempts;
        policy.initial_delay = Duration::from_millis(2);
        policy.jitter = 0.0;
        policy
    }

    struct Fixture {
        service: RetryService,
        store: Arc<MemoryStore>,
        payment_id: PaymentId,
    }

    async fn fixture(processor: Arc<dyn RetryProcessor>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let locks = Arc::new(LockManager::new());
        let team = Team::new("acme", "Acme", "secret");
        store.insert_team(&team).await.unwrap();

        let mut payment = Payment::create(NewPayment {
            order_id: "O-1".into(),
            team_id: team.id,
            team_slug: "acme".into(),
            amount: 10_000,
            currency: "RUB".into(),
            expiry_minutes: Some(30),
            description: None,
            customer_key: None,
            email: None,
            metadata: HashMap::new(),
            items: None,
            receipt: None,
        });
        payment.status = PaymentStatus::AuthFail;
        payment.error_code = Some("1009".into());
        let payment_id = payment.id;
        store.insert_payment(&payment).await.unwrap();

        Fixture {
            service: RetryService::new(store.clone(), locks, audit, processor),
            store,
            payment_id,
        }
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let processor = ScriptedProcessor::failing(2);
        let f = fixture(processor.clone()).await;

        let outcome = f.service.retry(&f.payment_id, &fast_policy(3)).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.attempts_used, 3);
        assert_eq!(processor.calls.load(Ordering::SeqCst), 3);

        let rows = f.store.retry_attempts_for(&f.payment_id).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].attempt_number, 1);
        assert_eq!(rows[2].attempt_number, 3);
        assert!(rows[2].is_success);
        assert!(!rows[0].is_success);
    }

    #[tokio::test]
    async fn attempt_rows_never_exceed_policy_maximum() {
        let f = fixture(ScriptedProcessor::failing(u32::MAX)).await;
        let policy = fast_policy(3);

        let outcome = f.service.retry(&f.payment_id, &policy).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.total_attempts, 3);

        // A second invocation has no budget left.
        let err = f.service.retry(&f.payment_id, &policy).await.unwrap_err();
        assert_eq!(err.error_code(), "1001");
        assert_eq!(f.store.retry_attempts_for(&f.payment_id).await.unwrap().len(), 3);
        assert_eq!(f.service.dead_letters(), vec![f.payment_id]);
    }

    #[tokio::test]
    async fn counter_is_cumulative_across_invocations() {
        let f = fixture(ScriptedProcessor::failing(u32::MAX)).await;
        let outcome = f.service.retry(&f.payment_id, &fast_policy(2)).await.unwrap();
        assert_eq!(outcome.total_attempts, 2);

        // A wider policy picks up where the narrow one stopped.
        let outcome = f.service.retry(&f.payment_id, &fast_policy(5)).await.unwrap();
        assert_eq!(outcome.attempts_used, 3);
        assert_eq!(outcome.total_attempts, 5);
        let rows = f.store.retry_attempts_for(&f.payment_id).await.unwrap();
        let numbers: Vec<u32> = rows.iter().map(|r| r.attempt_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn non_retryable_code_is_refused_up_front() {
        let f = fixture(ScriptedProcessor::failing(0)).await;
        let mut payment = f.store.get_payment(&f.payment_id).await.unwrap();
        payment.error_code = Some("1004".into());
        f.store.update_payment(&payment).await.unwrap();

        let err = f.service.retry(&f.payment_id, &fast_policy(3)).await.unwrap_err();
        assert_eq!(err.error_code(), "1001");
        assert!(f.store.retry_attempts_for(&f.payment_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn settled_payments_are_not_retried() {
        let f = fixture(ScriptedProcessor::failing(0)).await;
        let mut payment = f.store.get_payment(&f.payment_id).await.unwrap();
        payment.status = PaymentStatus::Confirmed;
        f.store.update_payment(&payment).await.unwrap();

        assert!(f.service.retry(&f.payment_id, &fast_policy(3)).await.is_err());
    }

    #[tokio::test]
    async fn stale_payments_are_not_retried() {
        let f = fixture(ScriptedProcessor::failing(0)).await;
        let mut payment = f.store.get_payment(&f.payment_id).await.unwrap();
        payment.created_at = Utc::now() - ChronoDuration::hours(MAX_RETRY_AGE_HOURS + 1);
        f.store.update_payment(&payment).await.unwrap();

        assert!(f.service.retry(&f.payment_id, &fast_policy(3)).await.is_err());
    }

    #[tokio::test]
    async fn backoff_sleeps_between_attempts() {
        let f = fixture(ScriptedProcessor::failing(u32::MAX)).await;
        let mut policy = fast_policy(3);
        policy.initial_delay = Duration::from_millis(30);

        let started = Instant::now();
        f.service.retry(&f.payment_id, &policy).await.unwrap();
        // Sleeps of ~30ms and ~60ms sit between the three attempts.
        assert!(started.elapsed() >= Duration::from_millis(80));
    }
}
