//! Business rule data model
//!
//! Rules are table-driven guards evaluated against a payment context. The
//! rule engine crate owns evaluation; this module owns the stored shape.

use crate::{RuleId, TeamId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Typed rule families the engine knows how to evaluate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    PaymentLimit,
    AmountValidation,
    CurrencyValidation,
    TeamRestriction,
    GeographicRestriction,
    TimeRestriction,
    PaymentMethodRestriction,
    FraudPrevention,
    ComplianceCheck,
    CustomValidation,
    CustomerRestriction,
}

/// What a matched rule does to the evaluated operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleAction {
    Allow,
    Deny,
    Warn,
    RequireApproval,
    ApplyFee,
    Redirect,
}

/// A stored business rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessRule {
    pub id: RuleId,
    /// Owning team; `None` makes the rule global
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<TeamId>,
    pub name: String,
    pub rule_type: RuleType,
    pub action: RuleAction,
    /// Lower priority evaluates earlier
    pub priority: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    /// Thresholds and knobs read by the typed predicates
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_payment_methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_currencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_countries: Vec<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BusinessRule {
    /// Construct an enabled rule with default priority
    pub fn new(team_id: Option<TeamId>, name: impl Into<String>, rule_type: RuleType, action: RuleAction) -> Self {
        let now = Utc::now();
        Self {
            id: RuleId::new(),
            team_id,
            name: name.into(),
            rule_type,
            action,
            priority: 100,
            valid_from: None,
            valid_to: None,
            parameters: HashMap::new(),
            allowed_payment_methods: Vec::new(),
            allowed_currencies: Vec::new(),
            allowed_countries: Vec::new(),
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a numeric parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Override the evaluation priority
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Whether the rule applies at the given instant
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        if self.valid_from.is_some_and(|from| now < from) {
            return false;
        }
        if self.valid_to.is_some_and(|to| now > to) {
            return false;
        }
        true
    }

    /// Read a numeric parameter as minor units
    pub fn param_i64(&self, key: &str) -> Option<i64> {
        self.parameters.get(key).and_then(|v| v.as_i64())
    }
}
