//! Store contracts

use chrono::{DateTime, Utc};
use paygate_types::{
    BusinessRule, Customer, Payment, PaymentId, PaymentStatus, Result, RetryAttempt, RuleId, Team,
    TeamId, TransitionId, TransitionRecord,
};

/// CRUD over payments, transition records, and retry attempts
///
/// Idempotency on `(team_id, order_id)` lives here: `insert_payment` is
/// the only way a payment comes into existence and refuses duplicates.
#[async_trait::async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert a fresh payment; `DuplicateOrder` if the team already has
    /// a payment for this order
    async fn insert_payment(&self, payment: &Payment) -> Result<()>;

    async fn get_payment(&self, id: &PaymentId) -> Result<Payment>;

    async fn find_by_order(&self, team_id: &TeamId, order_id: &str) -> Result<Option<Payment>>;

    /// Persist payment fields without a status change
    async fn update_payment(&self, payment: &Payment) -> Result<()>;

    /// Unit-of-work: persist the payment and its transition record
    /// atomically; on failure neither is visible
    async fn save_transition(&self, payment: &Payment, record: &TransitionRecord) -> Result<()>;

    /// Transition records for a payment, oldest first
    async fn transitions_for(&self, id: &PaymentId) -> Result<Vec<TransitionRecord>>;

    async fn get_transition(
        &self,
        id: &PaymentId,
        transition_id: &TransitionId,
    ) -> Result<Option<TransitionRecord>>;

    async fn append_retry_attempt(&self, attempt: &RetryAttempt) -> Result<()>;

    /// Retry attempts for a payment, oldest first
    async fn retry_attempts_for(&self, id: &PaymentId) -> Result<Vec<RetryAttempt>>;

    /// Non-terminal payments of a team
    async fn active_payments(&self, team_id: &TeamId) -> Result<Vec<Payment>>;

    /// Non-terminal payments whose expiry deadline lies before the cutoff
    async fn payments_expiring_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Payment>>;

    /// Payments currently in any of the given statuses
    async fn payments_in_status(&self, statuses: &[PaymentStatus]) -> Result<Vec<Payment>>;

    /// Confirmed volume of a team for the calendar day containing `day`,
    /// in minor units
    async fn daily_total(&self, team_id: &TeamId, day: DateTime<Utc>) -> Result<i64>;

    /// Backend housekeeping (vacuum/analyze or equivalent); no-op where
    /// the backend has none
    async fn maintain(&self) -> Result<()>;
}

/// CRUD over merchant teams
#[async_trait::async_trait]
pub trait TeamStore: Send + Sync {
    async fn insert_team(&self, team: &Team) -> Result<()>;
    async fn get_team(&self, id: &TeamId) -> Result<Team>;
    async fn get_team_by_slug(&self, team_slug: &str) -> Result<Team>;
    async fn update_team(&self, team: &Team) -> Result<()>;
    async fn list_teams(&self) -> Result<Vec<Team>>;
}

/// CRUD over customers
#[async_trait::async_trait]
pub trait CustomerStore: Send + Sync {
    async fn insert_customer(&self, customer: &Customer) -> Result<()>;
    async fn find_customer(&self, team_id: &TeamId, customer_key: &str) -> Result<Option<Customer>>;
}

/// CRUD over business rules
#[async_trait::async_trait]
pub trait RuleStore: Send + Sync {
    async fn insert_rule(&self, rule: &BusinessRule) -> Result<()>;
    async fn update_rule(&self, rule: &BusinessRule) -> Result<()>;
    async fn delete_rule(&self, id: &RuleId) -> Result<()>;
    async fn get_rule(&self, id: &RuleId) -> Result<BusinessRule>;
    /// Rules applicable to a team: its own rules plus the global ones
    async fn rules_for_team(&self, team_id: &TeamId) -> Result<Vec<BusinessRule>>;
    async fn list_rules(&self) -> Result<Vec<BusinessRule>>;
}
