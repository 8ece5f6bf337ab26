//! Typed rule predicates
//!
//! Each rule family reads its thresholds from the rule parameters and its
//! facts from the context. A predicate returns `Some(message)` when the
//! context falls outside the rule's envelope, `None` when it passes.
//! There is no generic expression evaluator; CUSTOM_VALIDATION rules are
//! carried but never match.

use crate::RuleContext;
use chrono::Timelike;
use paygate_types::{BusinessRule, RuleType};

/// Evaluate one rule against the context
pub fn evaluate_rule(rule: &BusinessRule, ctx: &RuleContext) -> Option<String> {
    match rule.rule_type {
        RuleType::PaymentLimit => payment_limit(rule, ctx),
        RuleType::AmountValidation => amount_validation(rule, ctx),
        RuleType::CurrencyValidation => currency_validation(rule, ctx),
        RuleType::TeamRestriction => team_restriction(rule, ctx),
        RuleType::GeographicRestriction => geographic_restriction(rule, ctx),
        RuleType::TimeRestriction => time_restriction(rule, ctx),
        RuleType::PaymentMethodRestriction => payment_method_restriction(rule, ctx),
        RuleType::FraudPrevention => fraud_prevention(rule, ctx),
        RuleType::ComplianceCheck => compliance_check(rule, ctx),
        RuleType::CustomValidation => None,
        RuleType::CustomerRestriction => customer_restriction(rule, ctx),
    }
}

fn payment_limit(rule: &BusinessRule, ctx: &RuleContext) -> Option<String> {
    if let Some(limit) = rule.param_i64("transaction_limit") {
        if ctx.amount > limit {
            return Some(format!("amount {} exceeds transaction limit {}", ctx.amount, limit));
        }
    }
    if let Some(limit) = rule.param_i64("daily_limit") {
        if ctx.daily_total + ctx.amount > limit {
            return Some(format!(
                "daily total {} plus amount {} exceeds daily limit {}",
                ctx.daily_total, ctx.amount, limit
            ));
        }
    }
    None
}

fn amount_validation(rule: &BusinessRule, ctx: &RuleContext) -> Option<String> {
    if let Some(min) = rule.param_i64("min_amount") {
        if ctx.amount < min {
            return Some(format!("amount {} below minimum {}", ctx.amount, min));
        }
    }
    if let Some(max) = rule.param_i64("max_amount") {
        if ctx.amount > max {
            return Some(format!("amount {} above maximum {}", ctx.amount, max));
        }
    }
    None
}

fn currency_validation(rule: &BusinessRule, ctx: &RuleContext) -> Option<String> {
    if rule.allowed_currencies.is_empty() {
        return None;
    }
    if rule.allowed_currencies.iter().any(|c| c == &ctx.currency) {
        None
    } else {
        Some(format!("currency {} is not permitted", ctx.currency))
    }
}

fn team_restriction(rule: &BusinessRule, ctx: &RuleContext) -> Option<String> {
    let suspended = rule
        .parameters
        .get("suspended")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if suspended {
        Some(format!("team {} is suspended", ctx.team_slug))
    } else {
        None
    }
}

fn geographic_restriction(rule: &BusinessRule, ctx: &RuleContext) -> Option<String> {
    if rule.allowed_countries.is_empty() {
        return None;
    }
    match &ctx.country {
        Some(country) if rule.allowed_countries.iter().any(|c| c == country) => None,
        Some(country) => Some(format!("country {country} is not permitted")),
        // Unknown origin fails a geographic allow-list.
        None => Some("country of origin is unknown".into()),
    }
}

fn time_restriction(rule: &BusinessRule, ctx: &RuleContext) -> Option<String> {
    let hour = ctx.now.hour() as i64;
    let from = rule.param_i64("allowed_from_hour").unwrap_or(0);
    let to = rule.param_i64("allowed_to_hour").unwrap_or(24);
    let inside = if from <= to {
        hour >= from && hour < to
    } else {
        // Window wraps midnight.
        hour >= from || hour < to
    };
    if inside {
        None
    } else {
        Some(format!("hour {hour} outside the allowed window {from}..{to}"))
    }
}

fn payment_method_restriction(rule: &BusinessRule, ctx: &RuleContext) -> Option<String> {
    if rule.allowed_payment_methods.is_empty() {
        return None;
    }
    match &ctx.payment_method {
        Some(method) if rule.allowed_payment_methods.iter().any(|m| m == method) => None,
        Some(method) => Some(format!("payment method {method} is not permitted")),
        None => Some("payment method is required".into()),
    }
}

fn fraud_prevention(rule: &BusinessRule, ctx: &RuleContext) -> Option<String> {
    let max_risk = rule
        .parameters
        .get("max_risk_score")
        .and_then(|v| v.as_f64())?;
    let risk = ctx.risk_score?;
    if risk > max_risk {
        Some(format!("risk score {risk:.2} above threshold {max_risk:.2}"))
    } else {
        None
    }
}

fn compliance_check(rule: &BusinessRule, ctx: &RuleContext) -> Option<String> {
    let require_email = rule
        .parameters
        .get("require_email")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if require_email && ctx.email.is_none() {
        return Some("email is required for this operation".into());
    }
    if let Some(cap) = rule.param_i64("max_anonymous_amount") {
        if ctx.customer_key.is_none() && ctx.amount > cap {
            return Some(format!("anonymous amount {} above cap {}", ctx.amount, cap));
        }
    }
    None
}

fn customer_restriction(rule: &BusinessRule, ctx: &RuleContext) -> Option<String> {
    if ctx.customer_blocked {
        return Some("customer is blocked".into());
    }
    if let (Some(blocked), Some(key)) = (rule.parameters.get("blocked_customers"), &ctx.customer_key) {
        if blocked
            .as_array()
            .is_some_and(|list| list.iter().any(|v| v.as_str() == Some(key)))
        {
            return Some(format!("customer {key} is restricted"));
        }
    }
    None
}
