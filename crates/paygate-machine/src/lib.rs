//! Paygate Machine - The payment state machine
//!
//! Sole allowed mutator of `Payment.status`. Every transition runs under
//! the payment's named lease, checks the static table, evaluates the
//! target's guard, and persists the payment together with its transition
//! record in one unit of work. Simultaneous callers are serialised by the
//! lock; the loser observes the post-transition status and must
//! re-evaluate.

pub mod guards;
pub mod table;

pub use guards::{CTX_CONFIRM_AMOUNT, CTX_REFUND_AMOUNT};
pub use table::{allowed_targets, is_transition_allowed};

use chrono::Utc;
use paygate_lock::{LockManager, DEFAULT_LOCK_EXPIRY};
use paygate_store::{PaymentStore, TeamStore};
use paygate_types::{
    GatewayError, Payment, PaymentId, PaymentStatus, Result, Team, TransitionId, TransitionOutcome,
    TransitionRecord,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A requested state change
#[derive(Debug, Clone)]
pub struct TransitionCommand {
    pub target: PaymentStatus,
    pub user_id: Option<String>,
    pub reason: Option<String>,
    pub context: HashMap<String, String>,
    rollback_of: Option<TransitionId>,
}

impl TransitionCommand {
    pub fn to(target: PaymentStatus) -> Self {
        Self {
            target,
            user_id: None,
            reason: None,
            context: HashMap::new(),
            rollback_of: None,
        }
    }

    pub fn by(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Non-mutating verdict from [`StateMachine::can_transition`]
#[derive(Debug, Clone)]
pub struct TransitionCheck {
    pub table_allowed: bool,
    pub violations: Vec<String>,
}

impl TransitionCheck {
    pub fn is_allowed(&self) -> bool {
        self.table_allowed && self.violations.is_empty()
    }
}

/// The state machine
pub struct StateMachine {
    store: Arc<dyn PaymentStore>,
    teams: Arc<dyn TeamStore>,
    locks: Arc<LockManager>,
}

impl StateMachine {
    pub fn new(store: Arc<dyn PaymentStore>, teams: Arc<dyn TeamStore>, locks: Arc<LockManager>) -> Self {
        Self { store, teams, locks }
    }

    fn lock_resource(payment_id: &PaymentId) -> String {
        format!("payment_state_transition_{}", payment_id.as_uuid())
    }

    async fn team_for(&self, payment: &Payment) -> Option<Team> {
        self.teams.get_team(&payment.team_id).await.ok()
    }

    /// Execute a transition under the payment's lease
    ///
    /// Returns the updated payment and the recorded outcome. The payment is
    /// re-read inside the lock, so stale callers fail on the table check
    /// instead of overwriting newer state.
    pub async fn transition(
        &self,
        payment_id: &PaymentId,
        command: TransitionCommand,
    ) -> Result<(Payment, TransitionOutcome)> {
        let resource = Self::lock_resource(payment_id);
        let Some(lease) = self.locks.acquire(&resource, DEFAULT_LOCK_EXPIRY, None).await else {
            return Err(GatewayError::LockConflict { resource });
        };
        let result = self.transition_locked(payment_id, command).await;
        self.locks.release(lease);
        result
    }

    async fn transition_locked(
        &self,
        payment_id: &PaymentId,
        command: TransitionCommand,
    ) -> Result<(Payment, TransitionOutcome)> {
        let mut payment = self.store.get_payment(payment_id).await?;
        let now = Utc::now();

        if !table::is_transition_allowed(payment.status, command.target) {
            return Err(GatewayError::InvalidTransition {
                from: payment.status,
                to: command.target,
            });
        }

        let team = self.team_for(&payment).await;
        let violations =
            guards::validate_target(&payment, team.as_ref(), command.target, &command.context, now);
        if !violations.is_empty() {
            return Err(GatewayError::RuleViolation { violations });
        }

        let from_status = payment.status;
        payment.status = command.target;
        payment.touch_status_timestamp(command.target, now);
        if command.target == PaymentStatus::Authorizing {
            payment.authorization_attempts += 1;
        }

        let record = TransitionRecord {
            id: TransitionId::new(),
            payment_id: *payment_id,
            from_status,
            to_status: command.target,
            transitioned_at: now,
            user_id: command.user_id,
            reason: command.reason,
            context: command.context.clone(),
            is_rollback: command.rollback_of.is_some(),
            rollback_of: command.rollback_of,
        };

        if let Err(err) = self.store.save_transition(&payment, &record).await {
            // The in-memory mutation dies with this scope; callers observe
            // the operation as not having happened.
            debug!(payment = %payment_id, "transition write failed: {err}");
            return Err(err);
        }

        info!(
            payment = %payment_id,
            from = %from_status,
            to = %command.target,
            "payment transitioned"
        );

        let outcome = TransitionOutcome {
            transition_id: record.id,
            from_status,
            to_status: command.target,
            transitioned_at: now,
            context: command.context,
        };
        Ok((payment, outcome))
    }

    /// Steps 2 and 3 of the transition contract without mutating anything
    pub async fn can_transition(
        &self,
        payment: &Payment,
        target: PaymentStatus,
        context: &HashMap<String, String>,
    ) -> TransitionCheck {
        let table_allowed = table::is_transition_allowed(payment.status, target);
        if !table_allowed {
            return TransitionCheck {
                table_allowed,
                violations: Vec::new(),
            };
        }
        let team = self.team_for(payment).await;
        let violations =
            guards::validate_target(payment, team.as_ref(), target, context, Utc::now());
        TransitionCheck {
            table_allowed,
            violations,
        }
    }

    /// Reverse a prior transition
    ///
    /// Succeeds only when the payment still sits in the named transition's
    /// `to_status`, that status is non-terminal, and the table permits a
    /// path back to the original `from_status`. The rollback is recorded
    /// as a new transition.
    pub async fn rollback(
        &self,
        payment_id: &PaymentId,
        transition_id: &TransitionId,
        user_id: Option<&str>,
    ) -> Result<(Payment, TransitionOutcome)> {
        let resource = Self::lock_resource(payment_id);
        let Some(lease) = self.locks.acquire(&resource, DEFAULT_LOCK_EXPIRY, None).await else {
            return Err(GatewayError::LockConflict { resource });
        };
        let result = self.rollback_locked(payment_id, transition_id, user_id).await;
        self.locks.release(lease);
        result
    }

    async fn rollback_locked(
        &self,
        payment_id: &PaymentId,
        transition_id: &TransitionId,
        user_id: Option<&str>,
    ) -> Result<(Payment, TransitionOutcome)> {
        let payment = self.store.get_payment(payment_id).await?;
        let record = self
            .store
            .get_transition(payment_id, transition_id)
            .await?
            .ok_or_else(|| GatewayError::not_found("transition", transition_id))?;

        if payment.status != record.to_status {
            return Err(GatewayError::RollbackRejected {
                transition_id: *transition_id,
                reason: format!(
                    "payment has moved on to {} since this transition",
                    payment.status
                ),
            });
        }
        if payment.status.is_terminal() {
            return Err(GatewayError::RollbackRejected {
                transition_id: *transition_id,
                reason: "terminal states cannot be rolled back".into(),
            });
        }
        if !table::is_transition_allowed(payment.status, record.from_status) {
            return Err(GatewayError::RollbackRejected {
                transition_id: *transition_id,
                reason: format!(
                    "no path from {} back to {}",
                    payment.status, record.from_status
                ),
            });
        }

        let mut command = TransitionCommand::to(record.from_status)
            .because(format!("rollback of {transition_id}"));
        if let Some(user_id) = user_id {
            command = command.by(user_id);
        }
        command.rollback_of = Some(*transition_id);
        self.transition_locked(payment_id, command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paygate_store::MemoryStore;
    use paygate_types::NewPayment;

    struct Fixture {
        machine: StateMachine,
        store: Arc<MemoryStore>,
        locks: Arc<LockManager>,
        payment_id: PaymentId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let locks = Arc::new(LockManager::new());
        let team = Team::new("acme", "Acme", "secret");
        store.insert_team(&team).await.unwrap();
        let payment = Payment::create(NewPayment {
            order_id: "O-1".into(),
            team_id: team.id,
            team_slug: "acme".into(),
            amount: 10_000,
            currency: "RUB".into(),
            expiry_minutes: Some(15),
            description: None,
            customer_key: None,
            email: None,
            metadata: HashMap::new(),
            items: None,
            receipt: None,
        });
        let payment_id = payment.id;
        store.insert_payment(&payment).await.unwrap();
        let machine = StateMachine::new(store.clone(), store.clone(), locks.clone());
        Fixture {
            machine,
            store,
            locks,
            payment_id,
        }
    }

    #[tokio::test]
    async fn transition_appends_a_chained_record() {
        let f = fixture().await;
        f.machine
            .transition(&f.payment_id, TransitionCommand::to(PaymentStatus::New))
            .await
            .unwrap();
        f.machine
            .transition(&f.payment_id, TransitionCommand::to(PaymentStatus::Authorizing))
            .await
            .unwrap();
        let (payment, outcome) = f
            .machine
            .transition(&f.payment_id, TransitionCommand::to(PaymentStatus::Authorized))
            .await
            .unwrap();

        assert_eq!(payment.status, PaymentStatus::Authorized);
        assert_eq!(outcome.from_status, PaymentStatus::Authorizing);
        assert!(payment.authorized_at.is_some());

        let records = f.store.transitions_for(&f.payment_id).await.unwrap();
        assert_eq!(records.len(), 3);
        for pair in records.windows(2) {
            assert_eq!(pair[1].from_status, pair[0].to_status);
        }
        assert_eq!(records[0].from_status, PaymentStatus::Init);
    }

    #[tokio::test]
    async fn invalid_transition_leaves_no_trace() {
        let f = fixture().await;
        let err = f
            .machine
            .transition(&f.payment_id, TransitionCommand::to(PaymentStatus::Confirmed))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "1006");
        assert_eq!(
            f.store.get_payment(&f.payment_id).await.unwrap().status,
            PaymentStatus::Init
        );
        assert!(f.store.transitions_for(&f.payment_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn guard_failure_reports_reasons() {
        let f = fixture().await;
        // EXPIRED before the deadline is a guard violation, not a table one.
        f.machine
            .transition(&f.payment_id, TransitionCommand::to(PaymentStatus::New))
            .await
            .unwrap();
        let err = f
            .machine
            .transition(&f.payment_id, TransitionCommand::to(PaymentStatus::Expired))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "1005");
        assert_eq!(
            f.store.get_payment(&f.payment_id).await.unwrap().status,
            PaymentStatus::New
        );
    }

    #[tokio::test]
    async fn held_lock_yields_conflict() {
        let f = fixture().await;
        let resource = StateMachine::lock_resource(&f.payment_id);
        let _held = f.locks.try_acquire(&resource, DEFAULT_LOCK_EXPIRY).unwrap();
        let err = f
            .machine
            .transition(&f.payment_id, TransitionCommand::to(PaymentStatus::New))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "1007");
    }

    #[tokio::test]
    async fn concurrent_callers_have_one_winner() {
        let f = fixture().await;
        f.machine
            .transition(&f.payment_id, TransitionCommand::to(PaymentStatus::New))
            .await
            .unwrap();

        let machine = Arc::new(f.machine);
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let machine = machine.clone();
            let payment_id = f.payment_id;
            tasks.push(tokio::spawn(async move {
                machine
                    .transition(&payment_id, TransitionCommand::to(PaymentStatus::Authorizing))
                    .await
                    .is_ok()
            }));
        }
        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        // The losers observed AUTHORIZING and failed the table check.
        assert_eq!(winners, 1);
        let records = f.store.transitions_for(&f.payment_id).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn authorization_attempts_are_counted() {
        let f = fixture().await;
        f.machine
            .transition(&f.payment_id, TransitionCommand::to(PaymentStatus::New))
            .await
            .unwrap();
        f.machine
            .transition(&f.payment_id, TransitionCommand::to(PaymentStatus::Authorizing))
            .await
            .unwrap();
        f.machine
            .transition(&f.payment_id, TransitionCommand::to(PaymentStatus::AuthFail))
            .await
            .unwrap();
        let (payment, _) = f
            .machine
            .transition(&f.payment_id, TransitionCommand::to(PaymentStatus::Authorizing))
            .await
            .unwrap();
        assert_eq!(payment.authorization_attempts, 2);

        // Third attempt hits the cap inside the guard.
        f.machine
            .transition(&f.payment_id, TransitionCommand::to(PaymentStatus::AuthFail))
            .await
            .unwrap();
        f.machine
            .transition(&f.payment_id, TransitionCommand::to(PaymentStatus::Authorizing))
            .await
            .unwrap();
        f.machine
            .transition(&f.payment_id, TransitionCommand::to(PaymentStatus::AuthFail))
            .await
            .unwrap();
        let err = f
            .machine
            .transition(&f.payment_id, TransitionCommand::to(PaymentStatus::Authorizing))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "1005");
    }

    #[tokio::test]
    async fn can_transition_is_non_mutating() {
        let f = fixture().await;
        let payment = f.store.get_payment(&f.payment_id).await.unwrap();
        let check = f
            .machine
            .can_transition(&payment, PaymentStatus::New, &HashMap::new())
            .await;
        assert!(check.is_allowed());
        let check = f
            .machine
            .can_transition(&payment, PaymentStatus::Confirmed, &HashMap::new())
            .await;
        assert!(!check.is_allowed());
        assert!(!check.table_allowed);
        assert!(f.store.transitions_for(&f.payment_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rollback_reverses_a_refunding_step() {
        let f = fixture().await;
        for target in [
            PaymentStatus::New,
            PaymentStatus::Authorizing,
            PaymentStatus::Authorized,
            PaymentStatus::Confirming,
            PaymentStatus::Confirmed,
        ] {
            f.machine
                .transition(&f.payment_id, TransitionCommand::to(target))
                .await
                .unwrap();
        }
        let (_, outcome) = f
            .machine
            .transition(
                &f.payment_id,
                TransitionCommand::to(PaymentStatus::Refunding)
                    .with_context(CTX_REFUND_AMOUNT, "5000"),
            )
            .await
            .unwrap();

        let (payment, rollback) = f
            .machine
            .rollback(&f.payment_id, &outcome.transition_id, Some("ops"))
            .await
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Confirmed);

        let records = f.store.transitions_for(&f.payment_id).await.unwrap();
        let last = records.last().unwrap();
        assert!(last.is_rollback);
        assert_eq!(last.rollback_of, Some(outcome.transition_id));
        assert_eq!(last.id, rollback.transition_id);
    }

    #[tokio::test]
    async fn rollback_rejected_once_state_moved_on() {
        let f = fixture().await;
        let (_, first) = f
            .machine
            .transition(&f.payment_id, TransitionCommand::to(PaymentStatus::New))
            .await
            .unwrap();
        f.machine
            .transition(&f.payment_id, TransitionCommand::to(PaymentStatus::Authorizing))
            .await
            .unwrap();

        let err = f
            .machine
            .rollback(&f.payment_id, &first.transition_id, None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "1006");
    }

    #[tokio::test]
    async fn rollback_across_terminal_is_forbidden() {
        let f = fixture().await;
        f.machine
            .transition(&f.payment_id, TransitionCommand::to(PaymentStatus::New))
            .await
            .unwrap();
        let (_, outcome) = f
            .machine
            .transition(
                &f.payment_id,
                TransitionCommand::to(PaymentStatus::Cancelled).because("merchant request"),
            )
            .await
            .unwrap();

        let err = f
            .machine
            .rollback(&f.payment_id, &outcome.transition_id, None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "1006");
    }

    #[tokio::test]
    async fn persistence_failure_surfaces_and_state_stays() {
        let f = fixture().await;
        f.store.fail_next_write();
        let err = f
            .machine
            .transition(&f.payment_id, TransitionCommand::to(PaymentStatus::New))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "1010");
        assert_eq!(
            f.store.get_payment(&f.payment_id).await.unwrap().status,
            PaymentStatus::Init
        );
    }
}
