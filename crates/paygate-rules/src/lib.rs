//! Paygate Rules - Business rule engine
//!
//! Table-driven evaluation of typed predicates against a payment context.
//! Rules are selected per team (team rules union global rules) inside
//! their validity window, ordered by ascending priority, and evaluation
//! short-circuits on the first DENY. Warnings accumulate without
//! blocking; the caller decides their policy.

mod predicates;

pub use predicates::evaluate_rule;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use paygate_audit::{AuditAction, AuditEntry, AuditLog, AuditSnapshot};
use paygate_store::RuleStore;
use paygate_types::{BusinessRule, Result, RuleAction, RuleId, TeamId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Context a rule set is evaluated against
#[derive(Debug, Clone)]
pub struct RuleContext {
    pub team_id: TeamId,
    pub team_slug: String,
    /// Amount of the operation under evaluation, minor units
    pub amount: i64,
    pub currency: String,
    pub payment_method: Option<String>,
    pub country: Option<String>,
    pub customer_key: Option<String>,
    pub customer_blocked: bool,
    pub email: Option<String>,
    /// Confirmed volume of the team so far today, minor units
    pub daily_total: i64,
    pub risk_score: Option<f64>,
    pub now: DateTime<Utc>,
}

impl RuleContext {
    /// Minimal context for a payment amount check
    pub fn for_amount(team_id: TeamId, team_slug: impl Into<String>, amount: i64, currency: impl Into<String>) -> Self {
        Self {
            team_id,
            team_slug: team_slug.into(),
            amount,
            currency: currency.into(),
            payment_method: None,
            country: None,
            customer_key: None,
            customer_blocked: false,
            email: None,
            daily_total: 0,
            risk_score: None,
            now: Utc::now(),
        }
    }
}

/// One rule that matched against the context
#[derive(Debug, Clone)]
pub struct RuleViolation {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub message: String,
}

/// Composed verdict of one evaluation pass
#[derive(Debug, Clone)]
pub struct RuleEvaluation {
    pub is_allowed: bool,
    pub is_warning: bool,
    pub requires_approval: bool,
    pub violations: Vec<RuleViolation>,
    pub warnings: Vec<RuleViolation>,
    /// Rules considered after selection and ordering
    pub rules_evaluated: usize,
}

impl RuleEvaluation {
    pub fn violation_messages(&self) -> Vec<String> {
        self.violations
            .iter()
            .map(|v| format!("{}: {}", v.rule_name, v.message))
            .collect()
    }
}

/// Counters recorded per evaluation for performance analytics
#[derive(Default)]
pub struct EvaluationMetrics {
    pub evaluations: AtomicU64,
    pub denials: AtomicU64,
    pub total_duration_us: AtomicU64,
}

impl EvaluationMetrics {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.evaluations.load(Ordering::Relaxed),
            self.denials.load(Ordering::Relaxed),
            self.total_duration_us.load(Ordering::Relaxed),
        )
    }
}

/// The rule engine
///
/// Holds the applicable-rules cache; every rule mutation goes through the
/// engine so the cache for the affected team is invalidated on the
/// writing path.
pub struct RuleEngine {
    store: Arc<dyn RuleStore>,
    audit: Arc<dyn AuditLog>,
    cache: DashMap<TeamId, Arc<Vec<BusinessRule>>>,
    metrics: EvaluationMetrics,
}

impl RuleEngine {
    pub fn new(store: Arc<dyn RuleStore>, audit: Arc<dyn AuditLog>) -> Self {
        Self {
            store,
            audit,
            cache: DashMap::new(),
            metrics: EvaluationMetrics::default(),
        }
    }

    /// Evaluate the applicable rules against a context
    pub async fn evaluate(&self, ctx: &RuleContext) -> Result<RuleEvaluation> {
        let started = Instant::now();
        let mut rules = self.applicable_rules(&ctx.team_id).await?;
        rules.retain(|r| r.is_active(ctx.now));
        rules.sort_by_key(|r| r.priority);

        let mut evaluation = RuleEvaluation {
            is_allowed: true,
            is_warning: false,
            requires_approval: false,
            violations: Vec::new(),
            warnings: Vec::new(),
            rules_evaluated: rules.len(),
        };

        for rule in &rules {
            let Some(message) = evaluate_rule(rule, ctx) else {
                continue;
            };
            let hit = RuleViolation {
                rule_id: rule.id,
                rule_name: rule.name.clone(),
                message,
            };
            match rule.action {
                RuleAction::Deny => {
                    debug!(rule = %rule.name, team = %ctx.team_slug, "rule denied operation");
                    evaluation.is_allowed = false;
                    evaluation.violations.push(hit);
                    break;
                }
                RuleAction::Warn => {
                    evaluation.is_warning = true;
                    evaluation.warnings.push(hit);
                }
                RuleAction::RequireApproval => {
                    evaluation.requires_approval = true;
                    evaluation.warnings.push(hit);
                }
                // Advisory actions; routing and fee application live with
                // the caller.
                RuleAction::Allow | RuleAction::ApplyFee | RuleAction::Redirect => {}
            }
        }

        self.metrics.evaluations.fetch_add(1, Ordering::Relaxed);
        if !evaluation.is_allowed {
            self.metrics.denials.fetch_add(1, Ordering::Relaxed);
        }
        self.metrics
            .total_duration_us
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
        Ok(evaluation)
    }

    /// Create a rule, invalidating the applicable-rules cache
    pub async fn create_rule(&self, rule: BusinessRule) -> Result<RuleId> {
        self.store.insert_rule(&rule).await?;
        self.invalidate(rule.team_id);
        self.audit
            .append(
                AuditEntry::for_entity(AuditAction::RuleChanged, &rule)
                    .with_details(format!("rule '{}' created", rule.name))
                    .seal(),
            )
            .await?;
        info!(rule = %rule.name, "business rule created");
        Ok(rule.id)
    }

    /// Update a rule, invalidating the applicable-rules cache
    pub async fn update_rule(&self, rule: BusinessRule) -> Result<()> {
        let before = self.store.get_rule(&rule.id).await?;
        self.store.update_rule(&rule).await?;
        self.invalidate(before.team_id);
        self.invalidate(rule.team_id);
        self.audit
            .append(
                AuditEntry::for_entity(AuditAction::RuleChanged, &rule)
                    .with_details(format!("rule '{}' updated", rule.name))
                    .with_snapshot_before(before.snapshot())
                    .seal(),
            )
            .await?;
        Ok(())
    }

    /// Delete a rule, invalidating the applicable-rules cache
    pub async fn delete_rule(&self, id: &RuleId) -> Result<()> {
        let before = self.store.get_rule(id).await?;
        self.store.delete_rule(id).await?;
        self.invalidate(before.team_id);
        self.audit
            .append(
                AuditEntry::new(AuditAction::RuleDeleted, id.to_prefixed_string(), "business_rule")
                    .with_details(format!("rule '{}' deleted", before.name))
                    .with_snapshot_before(before.snapshot())
                    .seal(),
            )
            .await?;
        Ok(())
    }

    pub async fn get_rule(&self, id: &RuleId) -> Result<BusinessRule> {
        self.store.get_rule(id).await
    }

    pub async fn list_rules(&self) -> Result<Vec<BusinessRule>> {
        self.store.list_rules().await
    }

    pub fn metrics(&self) -> &EvaluationMetrics {
        &self.metrics
    }

    async fn applicable_rules(&self, team_id: &TeamId) -> Result<Vec<BusinessRule>> {
        if let Some(cached) = self.cache.get(team_id) {
            return Ok(cached.as_ref().clone());
        }
        let rules = self.store.rules_for_team(team_id).await?;
        self.cache.insert(*team_id, Arc::new(rules.clone()));
        Ok(rules)
    }

    /// A global rule change clears every cached team set
    fn invalidate(&self, team_id: Option<TeamId>) {
        match team_id {
            Some(team_id) => {
                self.cache.remove(&team_id);
            }
            None => self.cache.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paygate_audit::InMemoryAuditLog;
    use paygate_store::MemoryStore;
    use paygate_types::RuleType;

    fn engine() -> (RuleEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        (RuleEngine::new(store.clone(), audit), store)
    }

    fn ctx(team_id: TeamId, amount: i64) -> RuleContext {
        RuleContext::for_amount(team_id, "acme", amount, "RUB")
    }

    #[tokio::test]
    async fn transaction_limit_denies_above_threshold() {
        let (engine, _) = engine();
        let team_id = TeamId::new();
        engine
            .create_rule(
                BusinessRule::new(Some(team_id), "txn-limit", RuleType::PaymentLimit, RuleAction::Deny)
                    .with_param("transaction_limit", 500_000i64),
            )
            .await
            .unwrap();

        let verdict = engine.evaluate(&ctx(team_id, 600_000)).await.unwrap();
        assert!(!verdict.is_allowed);
        assert_eq!(verdict.violations.len(), 1);

        let verdict = engine.evaluate(&ctx(team_id, 400_000)).await.unwrap();
        assert!(verdict.is_allowed);
    }

    #[tokio::test]
    async fn priority_orders_and_deny_short_circuits() {
        let (engine, _) = engine();
        let team_id = TeamId::new();
        engine
            .create_rule(
                BusinessRule::new(Some(team_id), "late-warn", RuleType::AmountValidation, RuleAction::Warn)
                    .with_param("max_amount", 1i64)
                    .with_priority(50),
            )
            .await
            .unwrap();
        engine
            .create_rule(
                BusinessRule::new(Some(team_id), "early-deny", RuleType::PaymentLimit, RuleAction::Deny)
                    .with_param("transaction_limit", 10i64)
                    .with_priority(10),
            )
            .await
            .unwrap();

        let verdict = engine.evaluate(&ctx(team_id, 100)).await.unwrap();
        assert!(!verdict.is_allowed);
        // The deny at priority 10 stopped evaluation before the warn.
        assert!(verdict.warnings.is_empty());
        assert_eq!(verdict.violations[0].rule_name, "early-deny");
    }

    #[tokio::test]
    async fn warnings_do_not_block() {
        let (engine, _) = engine();
        let team_id = TeamId::new();
        engine
            .create_rule(
                BusinessRule::new(Some(team_id), "warn-high", RuleType::AmountValidation, RuleAction::Warn)
                    .with_param("max_amount", 1_000i64),
            )
            .await
            .unwrap();

        let verdict = engine.evaluate(&ctx(team_id, 5_000)).await.unwrap();
        assert!(verdict.is_allowed);
        assert!(verdict.is_warning);
        assert_eq!(verdict.warnings.len(), 1);
    }

    #[tokio::test]
    async fn global_rules_apply_to_every_team() {
        let (engine, _) = engine();
        engine
            .create_rule(
                BusinessRule::new(None, "global-cap", RuleType::PaymentLimit, RuleAction::Deny)
                    .with_param("transaction_limit", 1_000i64),
            )
            .await
            .unwrap();

        let verdict = engine.evaluate(&ctx(TeamId::new(), 2_000)).await.unwrap();
        assert!(!verdict.is_allowed);
    }

    #[tokio::test]
    async fn daily_limit_uses_running_total() {
        let (engine, _) = engine();
        let team_id = TeamId::new();
        engine
            .create_rule(
                BusinessRule::new(Some(team_id), "daily", RuleType::PaymentLimit, RuleAction::Deny)
                    .with_param("daily_limit", 10_000i64),
            )
            .await
            .unwrap();

        let mut context = ctx(team_id, 4_000);
        context.daily_total = 7_000;
        let verdict = engine.evaluate(&context).await.unwrap();
        assert!(!verdict.is_allowed);

        context.daily_total = 5_000;
        let verdict = engine.evaluate(&context).await.unwrap();
        assert!(verdict.is_allowed);
    }

    #[tokio::test]
    async fn mutation_invalidates_cache() {
        let (engine, _) = engine();
        let team_id = TeamId::new();
        // Prime the cache with the empty rule set.
        assert!(engine.evaluate(&ctx(team_id, 1_000_000)).await.unwrap().is_allowed);

        engine
            .create_rule(
                BusinessRule::new(Some(team_id), "cap", RuleType::PaymentLimit, RuleAction::Deny)
                    .with_param("transaction_limit", 100i64),
            )
            .await
            .unwrap();
        // Without invalidation the stale empty set would still allow this.
        assert!(!engine.evaluate(&ctx(team_id, 1_000_000)).await.unwrap().is_allowed);
    }

    #[tokio::test]
    async fn expired_rule_is_ignored() {
        let (engine, _) = engine();
        let team_id = TeamId::new();
        let mut rule = BusinessRule::new(Some(team_id), "old", RuleType::PaymentLimit, RuleAction::Deny)
            .with_param("transaction_limit", 1i64);
        rule.valid_to = Some(Utc::now() - chrono::Duration::days(1));
        engine.create_rule(rule).await.unwrap();

        assert!(engine.evaluate(&ctx(team_id, 1_000)).await.unwrap().is_allowed);
    }

    #[tokio::test]
    async fn metrics_record_outcomes() {
        let (engine, _) = engine();
        let team_id = TeamId::new();
        engine
            .create_rule(
                BusinessRule::new(Some(team_id), "cap", RuleType::PaymentLimit, RuleAction::Deny)
                    .with_param("transaction_limit", 100i64),
            )
            .await
            .unwrap();
        engine.evaluate(&ctx(team_id, 50)).await.unwrap();
        engine.evaluate(&ctx(team_id, 500)).await.unwrap();
        let (evaluations, denials, _) = engine.metrics().snapshot();
        assert_eq!(evaluations, 2);
        assert_eq!(denials, 1);
    }
}
