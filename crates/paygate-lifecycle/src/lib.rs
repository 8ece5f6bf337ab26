//! Paygate Lifecycle - The operation orchestrator
//!
//! Public entry points for every payment mutation. Each operation follows
//! the same shape: lock, fetch, validate (rules and state machine),
//! persist, audit, publish. Rule evaluation precedes persistence, so a
//! denied initialization writes no payment row. On a persistence failure
//! the operation surfaces the error and leaves no partial state.

pub mod authorizer;
pub mod events;

pub use authorizer::{AutoApprove, PaymentAuthorizer};
pub use events::{EventPublisher, EventQueue, NullPublisher, PaymentEvent};

use chrono::Utc;
use paygate_audit::{AuditAction, AuditEntry, AuditLog, CorrelationTracker};
use paygate_lock::{LockManager, DEFAULT_LOCK_EXPIRY};
use paygate_machine::{StateMachine, TransitionCommand, CTX_REFUND_AMOUNT};
use paygate_rules::{RuleContext, RuleEngine};
use paygate_store::{CustomerStore, PaymentStore, TeamStore};
use paygate_types::{
    CorrelationId, GatewayError, NewPayment, Payment, PaymentId, PaymentStatus, Result, Team,
    TransitionOutcome,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Lifecycle tuning
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Base URL the hosted payment form is served under
    pub payment_base_url: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            payment_base_url: "https://pay.example.com".into(),
        }
    }
}

/// Collaborators of the lifecycle service
pub struct LifecycleDeps {
    pub store: Arc<dyn PaymentStore>,
    pub teams: Arc<dyn TeamStore>,
    pub customers: Arc<dyn CustomerStore>,
    pub machine: Arc<StateMachine>,
    pub locks: Arc<LockManager>,
    pub rules: Arc<RuleEngine>,
    pub audit: Arc<dyn AuditLog>,
    pub events: Arc<dyn EventPublisher>,
    pub authorizer: Arc<dyn PaymentAuthorizer>,
}

/// The lifecycle service
pub struct LifecycleService {
    store: Arc<dyn PaymentStore>,
    teams: Arc<dyn TeamStore>,
    customers: Arc<dyn CustomerStore>,
    machine: Arc<StateMachine>,
    locks: Arc<LockManager>,
    rules: Arc<RuleEngine>,
    audit: Arc<dyn AuditLog>,
    events: Arc<dyn EventPublisher>,
    authorizer: Arc<dyn PaymentAuthorizer>,
    correlations: CorrelationTracker,
    config: LifecycleConfig,
}

impl LifecycleService {
    pub fn new(deps: LifecycleDeps, config: LifecycleConfig) -> Self {
        Self {
            store: deps.store,
            teams: deps.teams,
            customers: deps.customers,
            machine: deps.machine,
            locks: deps.locks,
            rules: deps.rules,
            audit: deps.audit,
            events: deps.events,
            authorizer: deps.authorizer,
            correlations: CorrelationTracker::new(),
            config,
        }
    }

    pub fn correlations(&self) -> &CorrelationTracker {
        &self.correlations
    }

    /// Register a payment: rules first, then the row, then INIT -> NEW
    pub async fn initialize(&self, new: NewPayment) -> Result<Payment> {
        let team = self.teams.get_team_by_slug(&new.team_slug).await?;
        if !team.active {
            return Err(GatewayError::validation("TeamSlug", "team is not active"));
        }
        if new.amount <= 0 {
            return Err(GatewayError::validation("Amount", "must be a positive number of minor units"));
        }
        if new.order_id.is_empty() {
            return Err(GatewayError::validation("OrderId", "must not be empty"));
        }
        if !team.supports_currency(&new.currency) {
            return Err(GatewayError::validation(
                "Currency",
                format!("{} is not enabled for this team", new.currency),
            ));
        }

        let correlation = self
            .correlations
            .begin("payment_init", format!("{}:{}", new.team_slug, new.order_id));

        let verdict = self.evaluate_rules(&team, &new).await?;
        if !verdict.is_allowed {
            self.correlations.complete(correlation, false, "denied by rules");
            let violations = verdict.violation_messages();
            self.audit
                .append(
                    AuditEntry::new(AuditAction::RuleDenied, &new.order_id, "payment")
                        .with_team(&new.team_slug)
                        .with_correlation(correlation)
                        .with_details(violations.join("; "))
                        .seal(),
                )
                .await?;
            return Err(GatewayError::RuleViolation { violations });
        }
        if verdict.is_warning {
            self.correlations
                .attach_event(correlation, "rules", format!("{} warnings", verdict.warnings.len()));
        }

        let resource = format!("payment:init:{}:{}", new.order_id, team.id.as_uuid());
        let Some(lease) = self.locks.acquire(&resource, DEFAULT_LOCK_EXPIRY, None).await else {
            self.correlations.complete(correlation, false, "init lock contention");
            return Err(GatewayError::LockConflict { resource });
        };
        let result = self.initialize_locked(new, correlation).await;
        self.locks.release(lease);

        match &result {
            Ok(payment) => {
                self.correlations
                    .complete(correlation, true, format!("payment {} registered", payment.payment_ref()));
            }
            Err(err) => {
                self.correlations
                    .complete(correlation, false, format!("init failed: {err}"));
            }
        }
        result
    }

    async fn initialize_locked(
        &self,
        new: NewPayment,
        correlation: CorrelationId,
    ) -> Result<Payment> {
        if let Some(existing) = self.store.find_by_order(&new.team_id, &new.order_id).await? {
            return Err(GatewayError::DuplicateOrder {
                team_slug: existing.team_slug,
                order_id: existing.order_id,
            });
        }

        let mut payment = Payment::create(new);
        payment.payment_url = Some(format!(
            "{}/pay/{}",
            self.config.payment_base_url.trim_end_matches('/'),
            payment.payment_ref()
        ));
        self.store.insert_payment(&payment).await?;
        self.correlations
            .attach_event(correlation, "store", "payment row created");

        let (payment, outcome) = self
            .machine
            .transition(&payment.id, TransitionCommand::to(PaymentStatus::New))
            .await?;

        self.audit
            .append(
                AuditEntry::for_entity(AuditAction::PaymentInitialized, &payment)
                    .with_team(&payment.team_slug)
                    .with_correlation(correlation)
                    .with_details(format!("{} {} for order {}", payment.amount, payment.currency, payment.order_id))
                    .seal(),
            )
            .await?;
        self.publish(&payment, &outcome).await;

        info!(payment = %payment.payment_ref(), order = %payment.order_id, "payment initialized");
        Ok(payment)
    }

    async fn evaluate_rules(&self, team: &Team, new: &NewPayment) -> Result<paygate_rules::RuleEvaluation> {
        let customer = match &new.customer_key {
            Some(key) => self.customers.find_customer(&new.team_id, key).await?,
            None => None,
        };
        let daily_total = self.store.daily_total(&new.team_id, Utc::now()).await?;
        let ctx = RuleContext {
            team_id: team.id,
            team_slug: team.team_slug.clone(),
            amount: new.amount,
            currency: new.currency.clone(),
            payment_method: new.metadata.get("payment_method").cloned(),
            country: new.metadata.get("country").cloned(),
            customer_key: new.customer_key.clone(),
            customer_blocked: customer.map(|c| c.blocked).unwrap_or(false),
            email: new.email.clone(),
            daily_total,
            risk_score: None,
            now: Utc::now(),
        };
        self.rules.evaluate(&ctx).await
    }

    /// Move a pre-authorization status into AUTHORIZING
    pub async fn process(&self, payment_id: &PaymentId, user_id: Option<&str>) -> Result<Payment> {
        let payment = self.store.get_payment(payment_id).await?;
        // ONECHOOSEVISION reaches AUTHORIZING through FINISHAUTHORIZE; the
        // table has no direct edge.
        if payment.status == PaymentStatus::Onechoosevision {
            self.transition_with_audit(payment_id, PaymentStatus::Finishauthorize, user_id, None)
                .await?;
        }
        let (payment, _) = self
            .transition_with_audit(payment_id, PaymentStatus::Authorizing, user_id, None)
            .await?;
        Ok(payment)
    }

    /// Drive the payment to AUTHORIZED; returns the transition details
    pub async fn authorize(
        &self,
        payment_id: &PaymentId,
        user_id: Option<&str>,
    ) -> Result<(Payment, TransitionOutcome)> {
        let correlation = self.correlations.begin("payment_authorize", payment_id.to_string());
        let payment = self.store.get_payment(payment_id).await?;
        let payment = if payment.status == PaymentStatus::Authorizing {
            payment
        } else {
            self.process(payment_id, user_id).await?
        };

        if let Err(err) = self.authorizer.authorize(&payment).await {
            warn!(payment = %payment.payment_ref(), "authorizer declined: {err}");
            self.record_processing_failure(payment_id, &err, user_id).await?;
            self.correlations.complete(correlation, false, "authorizer declined");
            return Err(err);
        }

        let result = self
            .transition_with_audit(payment_id, PaymentStatus::Authorized, user_id, None)
            .await;
        self.correlations
            .complete(correlation, result.is_ok(), "authorize");
        result
    }

    /// Capture an authorized payment: AUTHORIZED -> CONFIRMING -> CONFIRMED
    pub async fn confirm(
        &self,
        payment_id: &PaymentId,
        user_id: Option<&str>,
    ) -> Result<Payment> {
        let correlation = self.correlations.begin("payment_confirm", payment_id.to_string());
        let (payment, _) = self
            .transition_with_audit(payment_id, PaymentStatus::Confirming, user_id, None)
            .await?;
        self.correlations
            .attach_event(correlation, "machine", "capture window open");

        if let Err(err) = self.authorizer.capture(&payment, payment.amount).await {
            warn!(payment = %payment.payment_ref(), "capture failed: {err}");
            self.transition_with_audit(payment_id, PaymentStatus::AuthFail, user_id, Some("capture failed"))
                .await?;
            self.correlations.complete(correlation, false, "capture failed");
            return Err(err);
        }

        let (payment, _) = self
            .transition_with_audit(payment_id, PaymentStatus::Confirmed, user_id, None)
            .await?;
        self.correlations.complete(correlation, true, "confirmed");
        Ok(payment)
    }

    /// Cancel a payment; reverses the hold first when one exists
    pub async fn cancel(
        &self,
        payment_id: &PaymentId,
        reason: &str,
        user_id: Option<&str>,
    ) -> Result<Payment> {
        let payment = self.store.get_payment(payment_id).await?;
        if payment.status == PaymentStatus::Authorized {
            self.authorizer.reverse(&payment).await?;
        }
        let (payment, _) = self
            .transition_with_audit(payment_id, PaymentStatus::Cancelled, user_id, Some(reason))
            .await?;
        Ok(payment)
    }

    /// Refund part or all of a confirmed payment
    pub async fn refund(
        &self,
        payment_id: &PaymentId,
        amount: i64,
        reason: &str,
        user_id: Option<&str>,
    ) -> Result<Payment> {
        let correlation = self.correlations.begin("payment_refund", payment_id.to_string());
        let payment = self.store.get_payment(payment_id).await?;
        if amount <= 0 || amount > payment.refundable() {
            self.correlations.complete(correlation, false, "amount outside refundable");
            return Err(GatewayError::InvalidAmount {
                requested: amount,
                refundable: payment.refundable(),
            });
        }

        let command = TransitionCommand::to(PaymentStatus::Refunding)
            .with_context(CTX_REFUND_AMOUNT, amount.to_string())
            .because(reason.to_string());
        let command = match user_id {
            Some(user) => command.by(user),
            None => command,
        };
        let (payment, outcome) = self.machine.transition(payment_id, command).await?;
        self.audit_transition(&payment, &outcome, user_id).await?;
        self.publish(&payment, &outcome).await;

        if let Err(err) = self.authorizer.refund(&payment, amount).await {
            // Compensate: the money never moved, so the payment returns to
            // where the refund found it.
            warn!(payment = %payment.payment_ref(), "refund side effect failed: {err}");
            let back = if payment.refunded_amount > 0 {
                PaymentStatus::PartialRefunded
            } else {
                PaymentStatus::Confirmed
            };
            self.transition_with_audit(payment_id, back, user_id, Some("refund failed"))
                .await?;
            self.correlations.complete(correlation, false, "refund side effect failed");
            return Err(err);
        }

        let mut payment = self.store.get_payment(payment_id).await?;
        payment.refunded_amount += amount;
        payment.refund_count += 1;
        self.store.update_payment(&payment).await?;

        let target = if payment.refunded_amount >= payment.amount {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartialRefunded
        };
        let (payment, _) = self
            .transition_with_audit(payment_id, target, user_id, Some(reason))
            .await?;

        self.audit
            .append(
                AuditEntry::for_entity(AuditAction::RefundAccepted { amount }, &payment)
                    .with_team(&payment.team_slug)
                    .with_correlation(correlation)
                    .with_details(format!(
                        "refunded {} of {}, total refunded {}",
                        amount, payment.amount, payment.refunded_amount
                    ))
                    .seal(),
            )
            .await?;
        self.correlations.complete(correlation, true, "refund accepted");
        Ok(payment)
    }

    /// Terminate an overdue payment; no-op on terminal or captured payments
    ///
    /// Calling this repeatedly on a terminal payment stays a no-op; a
    /// non-terminal payment past its deadline reaches EXPIRED in exactly
    /// one state change.
    pub async fn expire(&self, payment_id: &PaymentId) -> Result<Option<TransitionOutcome>> {
        let payment = self.store.get_payment(payment_id).await?;
        if payment.status.is_terminal() || payment.status == PaymentStatus::Confirmed {
            return Ok(None);
        }
        let (payment, outcome) = self
            .transition_with_audit(payment_id, PaymentStatus::Expired, None, Some("expiry sweep"))
            .await?;
        self.audit
            .append(
                AuditEntry::for_entity(AuditAction::PaymentExpired, &payment)
                    .with_team(&payment.team_slug)
                    .seal(),
            )
            .await?;
        Ok(Some(outcome))
    }

    /// Record a failure and terminate the payment
    pub async fn fail(
        &self,
        payment_id: &PaymentId,
        error_code: &str,
        error_message: &str,
    ) -> Result<Payment> {
        let mut payment = self.store.get_payment(payment_id).await?;
        payment.error_code = Some(error_code.to_string());
        payment.error_message = Some(error_message.to_string());
        self.store.update_payment(&payment).await?;
        let (payment, _) = self
            .transition_with_audit(payment_id, PaymentStatus::Cancelled, None, Some(error_message))
            .await?;
        Ok(payment)
    }

    pub async fn get_payment(&self, payment_id: &PaymentId) -> Result<Payment> {
        self.store.get_payment(payment_id).await
    }

    pub async fn get_status(&self, payment_id: &PaymentId) -> Result<PaymentStatus> {
        Ok(self.store.get_payment(payment_id).await?.status)
    }

    pub async fn get_active_payments(&self, team_id: &paygate_types::TeamId) -> Result<Vec<Payment>> {
        self.store.active_payments(team_id).await
    }

    pub async fn is_expired(&self, payment_id: &PaymentId) -> Result<bool> {
        let payment = self.store.get_payment(payment_id).await?;
        Ok(matches!(
            payment.status,
            PaymentStatus::Expired | PaymentStatus::DeadlineExpired
        ) || payment.is_past_expiry(Utc::now()))
    }

    /// AUTH_FAIL bookkeeping after an external decline, keeping the error
    /// fields in step with the transition record
    async fn record_processing_failure(
        &self,
        payment_id: &PaymentId,
        err: &GatewayError,
        user_id: Option<&str>,
    ) -> Result<()> {
        let mut payment = self.store.get_payment(payment_id).await?;
        payment.error_code = Some(err.error_code().to_string());
        payment.error_message = Some(err.to_string());
        self.store.update_payment(&payment).await?;
        self.transition_with_audit(payment_id, PaymentStatus::AuthFail, user_id, Some("authorizer declined"))
            .await?;
        Ok(())
    }

    async fn transition_with_audit(
        &self,
        payment_id: &PaymentId,
        target: PaymentStatus,
        user_id: Option<&str>,
        reason: Option<&str>,
    ) -> Result<(Payment, TransitionOutcome)> {
        let mut command = TransitionCommand::to(target);
        if let Some(user) = user_id {
            command = command.by(user);
        }
        if let Some(reason) = reason {
            command = command.because(reason);
        }
        let (payment, outcome) = self.machine.transition(payment_id, command).await?;
        self.audit_transition(&payment, &outcome, user_id).await?;
        self.publish(&payment, &outcome).await;
        Ok((payment, outcome))
    }

    async fn audit_transition(
        &self,
        payment: &Payment,
        outcome: &TransitionOutcome,
        user_id: Option<&str>,
    ) -> Result<()> {
        let mut entry = AuditEntry::for_entity(
            AuditAction::StatusTransition {
                from: outcome.from_status,
                to: outcome.to_status,
            },
            payment,
        )
        .with_team(&payment.team_slug)
        .with_details(format!("{} -> {}", outcome.from_status, outcome.to_status));
        if let Some(user) = user_id {
            entry = entry.with_user(user);
        }
        self.audit.append(entry.seal()).await?;
        Ok(())
    }

    async fn publish(&self, payment: &Payment, outcome: &TransitionOutcome) {
        let event = PaymentEvent {
            payment_id: payment.id,
            payment_ref: payment.payment_ref(),
            team_slug: payment.team_slug.clone(),
            order_id: payment.order_id.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            from_status: outcome.from_status,
            to_status: outcome.to_status,
            occurred_at: outcome.transitioned_at,
            error_code: payment.error_code.clone(),
        };
        // Event delivery is best-effort; the webhook worker retries, and a
        // full queue must not roll back a committed transition.
        if let Err(err) = self.events.publish(event).await {
            warn!(payment = %payment.payment_ref(), "event publish failed: {err}");
        }
    }
}
