//! In-memory store for tests and single-node runs

use crate::{CustomerStore, PaymentStore, RuleStore, TeamStore};
use chrono::{DateTime, Utc};
use paygate_types::{
    BusinessRule, Customer, GatewayError, Payment, PaymentId, PaymentStatus, Result, RetryAttempt,
    RuleId, Team, TeamId, TransitionId, TransitionRecord,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct PaymentTables {
    payments: HashMap<PaymentId, Payment>,
    order_index: HashMap<(TeamId, String), PaymentId>,
    transitions: HashMap<PaymentId, Vec<TransitionRecord>>,
    retries: HashMap<PaymentId, Vec<RetryAttempt>>,
}

#[derive(Default)]
struct TeamTables {
    teams: HashMap<TeamId, Team>,
    slug_index: HashMap<String, TeamId>,
    customers: HashMap<(TeamId, String), Customer>,
}

/// Everything behind `tokio::sync::RwLock`s; a single write guard over the
/// payment tables is what makes `save_transition` atomic.
pub struct MemoryStore {
    payments: RwLock<PaymentTables>,
    teams: RwLock<TeamTables>,
    rules: RwLock<HashMap<RuleId, BusinessRule>>,
    /// Test hook: fail the next write to exercise the persistence-error
    /// path of callers
    fail_next_write: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            payments: RwLock::new(PaymentTables::default()),
            teams: RwLock::new(TeamTables::default()),
            rules: RwLock::new(HashMap::new()),
            fail_next_write: AtomicBool::new(false),
        }
    }

    /// Make the next payment write fail with a persistence error
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> Result<()> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::Persistence {
                message: "injected write failure".into(),
            });
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PaymentStore for MemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        self.take_injected_failure()?;
        let mut tables = self.payments.write().await;
        let key = (payment.team_id, payment.order_id.clone());
        if tables.order_index.contains_key(&key) {
            return Err(GatewayError::DuplicateOrder {
                team_slug: payment.team_slug.clone(),
                order_id: payment.order_id.clone(),
            });
        }
        tables.order_index.insert(key, payment.id);
        tables.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get_payment(&self, id: &PaymentId) -> Result<Payment> {
        self.payments
            .read()
            .await
            .payments
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found("payment", id))
    }

    async fn find_by_order(&self, team_id: &TeamId, order_id: &str) -> Result<Option<Payment>> {
        let tables = self.payments.read().await;
        Ok(tables
            .order_index
            .get(&(*team_id, order_id.to_string()))
            .and_then(|id| tables.payments.get(id))
            .cloned())
    }

    async fn update_payment(&self, payment: &Payment) -> Result<()> {
        self.take_injected_failure()?;
        let mut tables = self.payments.write().await;
        if !tables.payments.contains_key(&payment.id) {
            return Err(GatewayError::not_found("payment", payment.id));
        }
        tables.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn save_transition(&self, payment: &Payment, record: &TransitionRecord) -> Result<()> {
        self.take_injected_failure()?;
        let mut tables = self.payments.write().await;
        if !tables.payments.contains_key(&payment.id) {
            return Err(GatewayError::not_found("payment", payment.id));
        }
        tables.payments.insert(payment.id, payment.clone());
        tables
            .transitions
            .entry(payment.id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn transitions_for(&self, id: &PaymentId) -> Result<Vec<TransitionRecord>> {
        Ok(self
            .payments
            .read()
            .await
            .transitions
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_transition(
        &self,
        id: &PaymentId,
        transition_id: &TransitionId,
    ) -> Result<Option<TransitionRecord>> {
        Ok(self
            .payments
            .read()
            .await
            .transitions
            .get(id)
            .and_then(|records| records.iter().find(|r| r.id == *transition_id))
            .cloned())
    }

    async fn append_retry_attempt(&self, attempt: &RetryAttempt) -> Result<()> {
        self.take_injected_failure()?;
        let mut tables = self.payments.write().await;
        tables
            .retries
            .entry(attempt.payment_id)
            .or_default()
            .push(attempt.clone());
        Ok(())
    }

    async fn retry_attempts_for(&self, id: &PaymentId) -> Result<Vec<RetryAttempt>> {
        Ok(self
            .payments
            .read()
            .await
            .retries
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn active_payments(&self, team_id: &TeamId) -> Result<Vec<Payment>> {
        Ok(self
            .payments
            .read()
            .await
            .payments
            .values()
            .filter(|p| p.team_id == *team_id && !p.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn payments_expiring_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Payment>> {
        Ok(self
            .payments
            .read()
            .await
            .payments
            .values()
            .filter(|p| !p.status.is_terminal() && p.status != PaymentStatus::Confirmed)
            .filter(|p| p.expires_at < cutoff)
            .cloned()
            .collect())
    }

    async fn payments_in_status(&self, statuses: &[PaymentStatus]) -> Result<Vec<Payment>> {
        Ok(self
            .payments
            .read()
            .await
            .payments
            .values()
            .filter(|p| statuses.contains(&p.status))
            .cloned()
            .collect())
    }

    async fn daily_total(&self, team_id: &TeamId, day: DateTime<Utc>) -> Result<i64> {
        let day = day.date_naive();
        Ok(self
            .payments
            .read()
            .await
            .payments
            .values()
            .filter(|p| p.team_id == *team_id && p.status.is_success())
            .filter(|p| {
                p.confirmed_at
                    .map(|at| at.date_naive() == day)
                    .unwrap_or(false)
            })
            .map(|p| p.amount)
            .sum())
    }

    async fn maintain(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl TeamStore for MemoryStore {
    async fn insert_team(&self, team: &Team) -> Result<()> {
        let mut tables = self.teams.write().await;
        if tables.slug_index.contains_key(&team.team_slug) {
            return Err(GatewayError::validation("team_slug", "already exists"));
        }
        tables.slug_index.insert(team.team_slug.clone(), team.id);
        tables.teams.insert(team.id, team.clone());
        Ok(())
    }

    async fn get_team(&self, id: &TeamId) -> Result<Team> {
        self.teams
            .read()
            .await
            .teams
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found("team", id))
    }

    async fn get_team_by_slug(&self, team_slug: &str) -> Result<Team> {
        let tables = self.teams.read().await;
        tables
            .slug_index
            .get(team_slug)
            .and_then(|id| tables.teams.get(id))
            .cloned()
            .ok_or_else(|| GatewayError::not_found("team", team_slug))
    }

    async fn update_team(&self, team: &Team) -> Result<()> {
        let mut tables = self.teams.write().await;
        if !tables.teams.contains_key(&team.id) {
            return Err(GatewayError::not_found("team", team.id));
        }
        tables.teams.insert(team.id, team.clone());
        Ok(())
    }

    async fn list_teams(&self) -> Result<Vec<Team>> {
        Ok(self.teams.read().await.teams.values().cloned().collect())
    }
}

#[async_trait::async_trait]
impl CustomerStore for MemoryStore {
    async fn insert_customer(&self, customer: &Customer) -> Result<()> {
        let mut tables = self.teams.write().await;
        tables
            .customers
            .insert((customer.team_id, customer.customer_key.clone()), customer.clone());
        Ok(())
    }

    async fn find_customer(&self, team_id: &TeamId, customer_key: &str) -> Result<Option<Customer>> {
        Ok(self
            .teams
            .read()
            .await
            .customers
            .get(&(*team_id, customer_key.to_string()))
            .cloned())
    }
}

#[async_trait::async_trait]
impl RuleStore for MemoryStore {
    async fn insert_rule(&self, rule: &BusinessRule) -> Result<()> {
        self.rules.write().await.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn update_rule(&self, rule: &BusinessRule) -> Result<()> {
        let mut rules = self.rules.write().await;
        if !rules.contains_key(&rule.id) {
            return Err(GatewayError::not_found("business rule", rule.id));
        }
        rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn delete_rule(&self, id: &RuleId) -> Result<()> {
        self.rules
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| GatewayError::not_found("business rule", id))
    }

    async fn get_rule(&self, id: &RuleId) -> Result<BusinessRule> {
        self.rules
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found("business rule", id))
    }

    async fn rules_for_team(&self, team_id: &TeamId) -> Result<Vec<BusinessRule>> {
        Ok(self
            .rules
            .read()
            .await
            .values()
            .filter(|r| r.team_id.is_none() || r.team_id == Some(*team_id))
            .cloned()
            .collect())
    }

    async fn list_rules(&self) -> Result<Vec<BusinessRule>> {
        Ok(self.rules.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paygate_types::{NewPayment, RuleAction, RuleType};
    use std::collections::HashMap as StdHashMap;

    fn payment(team_id: TeamId, order: &str) -> Payment {
        Payment::create(NewPayment {
            order_id: order.into(),
            team_id,
            team_slug: "acme".into(),
            amount: 10_000,
            currency: "RUB".into(),
            expiry_minutes: Some(15),
            description: None,
            customer_key: None,
            email: None,
            metadata: StdHashMap::new(),
            items: None,
            receipt: None,
        })
    }

    #[tokio::test]
    async fn duplicate_order_is_rejected() {
        let store = MemoryStore::new();
        let team_id = TeamId::new();
        store.insert_payment(&payment(team_id, "O-1")).await.unwrap();
        let err = store.insert_payment(&payment(team_id, "O-1")).await.unwrap_err();
        assert_eq!(err.error_code(), "1002");
        // A different team may reuse the order id.
        store.insert_payment(&payment(TeamId::new(), "O-1")).await.unwrap();
    }

    #[tokio::test]
    async fn save_transition_is_atomic_on_injected_failure() {
        let store = MemoryStore::new();
        let team_id = TeamId::new();
        let mut p = payment(team_id, "O-1");
        store.insert_payment(&p).await.unwrap();

        p.status = PaymentStatus::New;
        let record = TransitionRecord {
            id: TransitionId::new(),
            payment_id: p.id,
            from_status: PaymentStatus::Init,
            to_status: PaymentStatus::New,
            transitioned_at: Utc::now(),
            user_id: None,
            reason: None,
            context: StdHashMap::new(),
            is_rollback: false,
            rollback_of: None,
        };

        store.fail_next_write();
        assert!(store.save_transition(&p, &record).await.is_err());
        // Neither the status nor the record became visible.
        assert_eq!(store.get_payment(&p.id).await.unwrap().status, PaymentStatus::Init);
        assert!(store.transitions_for(&p.id).await.unwrap().is_empty());

        store.save_transition(&p, &record).await.unwrap();
        assert_eq!(store.get_payment(&p.id).await.unwrap().status, PaymentStatus::New);
        assert_eq!(store.transitions_for(&p.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expiring_filter_skips_terminal_and_confirmed() {
        let store = MemoryStore::new();
        let team_id = TeamId::new();

        let mut expired = payment(team_id, "O-1");
        expired.expires_at = Utc::now() - chrono::Duration::minutes(1);
        store.insert_payment(&expired).await.unwrap();

        let mut confirmed = payment(team_id, "O-2");
        confirmed.expires_at = Utc::now() - chrono::Duration::minutes(1);
        confirmed.status = PaymentStatus::Confirmed;
        store.insert_payment(&confirmed).await.unwrap();

        let mut terminal = payment(team_id, "O-3");
        terminal.expires_at = Utc::now() - chrono::Duration::minutes(1);
        terminal.status = PaymentStatus::Cancelled;
        store.insert_payment(&terminal).await.unwrap();

        let due = store.payments_expiring_before(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].order_id, "O-1");
    }

    #[tokio::test]
    async fn daily_total_counts_confirmed_today() {
        let store = MemoryStore::new();
        let team_id = TeamId::new();
        let mut a = payment(team_id, "O-1");
        a.status = PaymentStatus::Confirmed;
        a.confirmed_at = Some(Utc::now());
        store.insert_payment(&a).await.unwrap();
        let mut b = payment(team_id, "O-2");
        b.status = PaymentStatus::Confirmed;
        b.confirmed_at = Some(Utc::now() - chrono::Duration::days(2));
        store.insert_payment(&b).await.unwrap();
        let c = payment(team_id, "O-3");
        store.insert_payment(&c).await.unwrap();

        assert_eq!(store.daily_total(&team_id, Utc::now()).await.unwrap(), 10_000);
    }

    #[tokio::test]
    async fn rules_for_team_unions_global() {
        let store = MemoryStore::new();
        let team_id = TeamId::new();
        store
            .insert_rule(&BusinessRule::new(None, "global", RuleType::AmountValidation, RuleAction::Deny))
            .await
            .unwrap();
        store
            .insert_rule(&BusinessRule::new(Some(team_id), "mine", RuleType::PaymentLimit, RuleAction::Deny))
            .await
            .unwrap();
        store
            .insert_rule(&BusinessRule::new(Some(TeamId::new()), "other", RuleType::PaymentLimit, RuleAction::Deny))
            .await
            .unwrap();

        let rules = store.rules_for_team(&team_id).await.unwrap();
        assert_eq!(rules.len(), 2);
    }

    #[tokio::test]
    async fn team_slug_lookup() {
        let store = MemoryStore::new();
        let team = Team::new("acme", "Acme", "secret");
        store.insert_team(&team).await.unwrap();
        assert_eq!(store.get_team_by_slug("acme").await.unwrap().id, team.id);
        assert!(store.get_team_by_slug("nope").await.is_err());
        assert!(store.insert_team(&Team::new("acme", "Dup", "x")).await.is_err());
    }
}
