//! Status reconciliation against the external processor
//!
//! Payments sitting in NEW or AUTHORIZED are periodically compared with
//! the processor's view through the reconciler interface; a returned
//! target status is applied through the state machine like any other
//! transition.

use paygate_machine::{StateMachine, TransitionCommand};
use paygate_store::PaymentStore;
use paygate_types::{Payment, PaymentStatus, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// External view of a payment's fate
#[async_trait::async_trait]
pub trait Reconciler: Send + Sync {
    /// Compare one payment against the processor; `Some(target)` requests
    /// a corrective transition
    async fn reconcile(&self, payment: &Payment) -> Result<Option<PaymentStatus>>;
}

/// Reconciler that always agrees with the gateway
pub struct NoopReconciler;

#[async_trait::async_trait]
impl Reconciler for NoopReconciler {
    async fn reconcile(&self, _payment: &Payment) -> Result<Option<PaymentStatus>> {
        Ok(None)
    }
}

/// The reconciliation worker body
pub struct ReconcileTask {
    store: Arc<dyn PaymentStore>,
    machine: Arc<StateMachine>,
    reconciler: Arc<dyn Reconciler>,
}

impl ReconcileTask {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        machine: Arc<StateMachine>,
        reconciler: Arc<dyn Reconciler>,
    ) -> Self {
        Self {
            store,
            machine,
            reconciler,
        }
    }

    /// One reconciliation pass; returns how many corrections were applied
    pub async fn run_once(&self) -> Result<usize> {
        let candidates = self
            .store
            .payments_in_status(&[PaymentStatus::New, PaymentStatus::Authorized])
            .await?;
        let mut corrected = 0;
        for payment in candidates {
            let target = match self.reconciler.reconcile(&payment).await {
                Ok(target) => target,
                Err(err) => {
                    warn!(payment = %payment.payment_ref(), "reconciler unreachable: {err}");
                    continue;
                }
            };
            let Some(target) = target else { continue };
            match self
                .machine
                .transition(
                    &payment.id,
                    TransitionCommand::to(target).because("reconciliation against processor"),
                )
                .await
            {
                Ok(_) => {
                    info!(payment = %payment.payment_ref(), %target, "reconciliation applied");
                    corrected += 1;
                }
                Err(err) => {
                    warn!(payment = %payment.payment_ref(), %target, "reconciliation rejected: {err}")
                }
            }
        }
        Ok(corrected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paygate_lock::LockManager;
    use paygate_store::{MemoryStore, TeamStore};
    use paygate_types::{NewPayment, Team};
    use std::collections::HashMap;

    struct CancelEverything;

    #[async_trait::async_trait]
    impl Reconciler for CancelEverything {
        async fn reconcile(&self, payment: &Payment) -> Result<Option<PaymentStatus>> {
            Ok((payment.status == PaymentStatus::New).then_some(PaymentStatus::Cancelled))
        }
    }

    #[tokio::test]
    async fn applies_corrective_transitions() {
        let store = Arc::new(MemoryStore::new());
        let team = Team::new("acme", "Acme", "secret");
        store.insert_team(&team).await.unwrap();
        let mut payment = Payment::create(NewPayment {
            order_id: "O-1".into(),
            team_id: team.id,
            team_slug: "acme".into(),
            amount: 100,
            currency: "RUB".into(),
            expiry_minutes: Some(30),
            description: None,
            customer_key: None,
            email: None,
            metadata: HashMap::new(),
            items: None,
            receipt: None,
        });
        payment.status = PaymentStatus::New;
        store.insert_payment(&payment).await.unwrap();

        let machine = Arc::new(StateMachine::new(
            store.clone(),
            store.clone(),
            Arc::new(LockManager::new()),
        ));
        let task = ReconcileTask::new(store.clone(), machine, Arc::new(CancelEverything));

        assert_eq!(task.run_once().await.unwrap(), 1);
        assert_eq!(
            store.get_payment(&payment.id).await.unwrap().status,
            PaymentStatus::Cancelled
        );
        // A second pass finds nothing left to correct.
        assert_eq!(task.run_once().await.unwrap(), 0);
    }
}
