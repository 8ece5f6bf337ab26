//! Per-target business predicates
//!
//! Evaluated after the table check. A guard returns the list of reasons
//! the transition must not happen; an empty list lets it through.

use chrono::{DateTime, Utc};
use paygate_types::{Payment, PaymentStatus, Team};
use std::collections::HashMap;

/// Context key carrying the refund amount for REFUNDING transitions
pub const CTX_REFUND_AMOUNT: &str = "refund_amount";

/// Context key carrying the capture amount for CONFIRMING transitions
pub const CTX_CONFIRM_AMOUNT: &str = "confirm_amount";

fn ctx_amount(context: &HashMap<String, String>, key: &str) -> Option<i64> {
    context.get(key).and_then(|v| v.parse::<i64>().ok())
}

/// Guard for the target status, if it has one
pub fn validate_target(
    payment: &Payment,
    team: Option<&Team>,
    target: PaymentStatus,
    context: &HashMap<String, String>,
    now: DateTime<Utc>,
) -> Vec<String> {
    match target {
        PaymentStatus::Authorizing => validate_for_authorization(payment, team, now),
        PaymentStatus::Confirming => validate_for_confirmation(payment, context, now),
        PaymentStatus::Refunding => validate_for_refund(payment, context),
        PaymentStatus::Expired | PaymentStatus::DeadlineExpired => {
            validate_for_expiry(payment, now)
        }
        _ => Vec::new(),
    }
}

/// AUTHORIZING: positive amount, active team, live deadline, attempts left
pub fn validate_for_authorization(
    payment: &Payment,
    team: Option<&Team>,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut reasons = Vec::new();
    if payment.amount <= 0 {
        reasons.push(format!("amount {} must be positive", payment.amount));
    }
    match team {
        Some(team) if !team.active => reasons.push(format!("team {} is not active", team.team_slug)),
        None => reasons.push("owning team is unknown".into()),
        _ => {}
    }
    if payment.is_past_expiry(now) {
        reasons.push("payment is past its expiry deadline".into());
    }
    if payment.authorization_attempts >= payment.max_allowed_attempts {
        reasons.push(format!(
            "authorization attempts exhausted ({}/{})",
            payment.authorization_attempts, payment.max_allowed_attempts
        ));
    }
    reasons
}

/// CONFIRMING: funds held, capture within the authorized amount, live deadline
pub fn validate_for_confirmation(
    payment: &Payment,
    context: &HashMap<String, String>,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut reasons = Vec::new();
    if payment.authorized_at.is_none() {
        reasons.push("payment was never authorized".into());
    }
    let confirm_amount = ctx_amount(context, CTX_CONFIRM_AMOUNT).unwrap_or(payment.amount);
    if confirm_amount > payment.amount {
        reasons.push(format!(
            "confirm amount {} exceeds authorized amount {}",
            confirm_amount, payment.amount
        ));
    }
    if payment.is_past_expiry(now) {
        reasons.push("payment is past its expiry deadline".into());
    }
    reasons
}

/// REFUNDING: refundable balance remains and covers the requested amount
pub fn validate_for_refund(payment: &Payment, context: &HashMap<String, String>) -> Vec<String> {
    let mut reasons = Vec::new();
    let refundable = payment.refundable();
    if refundable <= 0 {
        reasons.push("nothing left to refund".into());
    }
    if let Some(amount) = ctx_amount(context, CTX_REFUND_AMOUNT) {
        if amount <= 0 {
            reasons.push(format!("refund amount {amount} must be positive"));
        } else if amount > refundable {
            reasons.push(format!(
                "refund amount {amount} exceeds refundable balance {refundable}"
            ));
        }
    }
    reasons
}

/// EXPIRED: the deadline must actually have passed
pub fn validate_for_expiry(payment: &Payment, now: DateTime<Utc>) -> Vec<String> {
    if payment.is_past_expiry(now) {
        Vec::new()
    } else {
        vec![format!(
            "payment does not expire until {}",
            payment.expires_at
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use paygate_types::{NewPayment, TeamId};

    fn payment() -> Payment {
        Payment::create(NewPayment {
            order_id: "O-1".into(),
            team_id: TeamId::new(),
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
        })
    }

    #[test]
    fn authorization_guard() {
        let p = payment();
        let team = Team::new("acme", "Acme", "secret");
        let now = Utc::now();
        assert!(validate_for_authorization(&p, Some(&team), now).is_empty());

        let mut inactive = team.clone();
        inactive.active = false;
        assert_eq!(validate_for_authorization(&p, Some(&inactive), now).len(), 1);

        let mut exhausted = p.clone();
        exhausted.authorization_attempts = exhausted.max_allowed_attempts;
        assert_eq!(validate_for_authorization(&exhausted, Some(&team), now).len(), 1);

        let late = now + Duration::minutes(30);
        assert_eq!(validate_for_authorization(&p, Some(&team), late).len(), 1);
    }

    #[test]
    fn confirmation_requires_prior_authorization() {
        let mut p = payment();
        let now = Utc::now();
        let ctx = HashMap::new();
        assert!(!validate_for_confirmation(&p, &ctx, now).is_empty());
        p.authorized_at = Some(now);
        assert!(validate_for_confirmation(&p, &ctx, now).is_empty());

        let mut over = HashMap::new();
        over.insert(CTX_CONFIRM_AMOUNT.to_string(), "20000".to_string());
        assert!(!validate_for_confirmation(&p, &over, now).is_empty());
    }

    #[test]
    fn refund_guard_tracks_refundable_balance() {
        let mut p = payment();
        let mut ctx = HashMap::new();
        ctx.insert(CTX_REFUND_AMOUNT.to_string(), "3000".to_string());
        assert!(validate_for_refund(&p, &ctx).is_empty());

        p.refunded_amount = 8_000;
        assert!(!validate_for_refund(&p, &ctx).is_empty());

        p.refunded_amount = 10_000;
        let empty = HashMap::new();
        assert!(!validate_for_refund(&p, &empty).is_empty());
    }

    #[test]
    fn expiry_guard_needs_a_passed_deadline() {
        let p = payment();
        assert!(!validate_for_expiry(&p, Utc::now()).is_empty());
        assert!(validate_for_expiry(&p, Utc::now() + Duration::hours(1)).is_empty());
    }
}
