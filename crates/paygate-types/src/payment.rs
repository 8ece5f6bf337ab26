//! The payment aggregate
//!
//! A payment is the root entity of the gateway. It is created in INIT by
//! the initialization flow and only ever mutated through the lifecycle
//! service; its status is owned by the state machine.

use crate::{PaymentId, PaymentStatus, TeamId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default payment expiry if the merchant supplies none, in minutes
pub const DEFAULT_PAYMENT_EXPIRY_MINUTES: i64 = 15;

/// Default cap on authorization attempts per payment
pub const DEFAULT_MAX_AUTHORIZATION_ATTEMPTS: u32 = 3;

/// A merchant-initiated monetary intent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    /// Internal identity; its prefixed form is the merchant-facing PaymentId
    pub id: PaymentId,
    /// Merchant-chosen order identifier, unique per team
    pub order_id: String,
    /// Owning team
    pub team_id: TeamId,
    /// Owning team slug, denormalised for audit and webhooks
    pub team_slug: String,

    /// Amount in minor units
    pub amount: i64,
    /// ISO-4217 currency code
    pub currency: String,
    /// Total refunded so far, in minor units
    pub refunded_amount: i64,
    /// Number of accepted refunds
    pub refund_count: u32,

    /// Current lifecycle status
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Deadline after which the expiry sweep may terminate the payment
    pub expires_at: DateTime<Utc>,

    // Per-state timestamps, set once when the state is first reached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initialized_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_showed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorizing_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorized_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirming_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelling_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reversed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refunding_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refunded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,

    /// Authorization attempts consumed so far
    pub authorization_attempts: u32,
    /// Cap on authorization attempts
    pub max_allowed_attempts: u32,

    /// Last failure code, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Last failure message, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Hosted payment form URL handed to the merchant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Free-form merchant metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    /// Opaque item list as submitted by the merchant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<serde_json::Value>,
    /// Opaque receipt blob as submitted by the merchant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<serde_json::Value>,
}

/// Parameters for constructing a new payment in INIT
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: String,
    pub team_id: TeamId,
    pub team_slug: String,
    pub amount: i64,
    pub currency: String,
    pub expiry_minutes: Option<i64>,
    pub description: Option<String>,
    pub customer_key: Option<String>,
    pub email: Option<String>,
    pub metadata: HashMap<String, String>,
    pub items: Option<serde_json::Value>,
    pub receipt: Option<serde_json::Value>,
}

impl Payment {
    /// Construct a payment in INIT
    pub fn create(new: NewPayment) -> Self {
        let now = Utc::now();
        let expiry = new
            .expiry_minutes
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_PAYMENT_EXPIRY_MINUTES);
        Self {
            id: PaymentId::new(),
            order_id: new.order_id,
            team_id: new.team_id,
            team_slug: new.team_slug,
            amount: new.amount,
            currency: new.currency,
            refunded_amount: 0,
            refund_count: 0,
            status: PaymentStatus::Init,
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::minutes(expiry),
            initialized_at: Some(now),
            form_showed_at: None,
            authorizing_at: None,
            authorized_at: None,
            confirming_at: None,
            confirmed_at: None,
            cancelling_at: None,
            cancelled_at: None,
            reversed_at: None,
            refunding_at: None,
            refunded_at: None,
            rejected_at: None,
            expired_at: None,
            authorization_attempts: 0,
            max_allowed_attempts: DEFAULT_MAX_AUTHORIZATION_ATTEMPTS,
            error_code: None,
            error_message: None,
            payment_url: None,
            description: new.description,
            customer_key: new.customer_key,
            email: new.email,
            metadata: new.metadata,
            items: new.items,
            receipt: new.receipt,
        }
    }

    /// Merchant-facing payment reference
    pub fn payment_ref(&self) -> String {
        self.id.to_prefixed_string()
    }

    /// Amount still available for refund, in minor units
    pub fn refundable(&self) -> i64 {
        self.amount - self.refunded_amount
    }

    /// Whether the expiry deadline has passed
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Stamp the per-state timestamp for a freshly entered status
    ///
    /// Timestamps are set once; re-entering a status (e.g. REFUNDING after
    /// PARTIAL_REFUNDED) keeps the first occurrence.
    pub fn touch_status_timestamp(&mut self, status: PaymentStatus, now: DateTime<Utc>) {
        let slot = match status {
            PaymentStatus::New => &mut self.initialized_at,
            PaymentStatus::FormShowed => &mut self.form_showed_at,
            PaymentStatus::Authorizing => &mut self.authorizing_at,
            PaymentStatus::Authorized => &mut self.authorized_at,
            PaymentStatus::Confirming => &mut self.confirming_at,
            PaymentStatus::Confirmed => &mut self.confirmed_at,
            PaymentStatus::Cancelling => &mut self.cancelling_at,
            PaymentStatus::Cancelled => &mut self.cancelled_at,
            PaymentStatus::Reversed => &mut self.reversed_at,
            PaymentStatus::Refunding => &mut self.refunding_at,
            PaymentStatus::Refunded | PaymentStatus::PartialRefunded => &mut self.refunded_at,
            PaymentStatus::Rejected => &mut self.rejected_at,
            PaymentStatus::Expired | PaymentStatus::DeadlineExpired => &mut self.expired_at,
            _ => return,
        };
        if slot.is_none() {
            *slot = Some(now);
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Payment {
        Payment::create(NewPayment {
            order_id: "O-1".into(),
            team_id: TeamId::new(),
            team_slug: "acme".into(),
            amount: 150_000,
            currency: "RUB".into(),
            expiry_minutes: Some(30),
            description: None,
            customer_key: None,
            email: None,
            metadata: HashMap::new(),
            items: None,
            receipt: None,
        })
    }

    #[test]
    fn created_in_init_with_expiry() {
        let p = sample();
        assert_eq!(p.status, PaymentStatus::Init);
        assert!(p.expires_at > p.created_at);
        assert_eq!(p.refundable(), 150_000);
    }

    #[test]
    fn zero_expiry_falls_back_to_default() {
        let mut new = NewPayment {
            order_id: "O-2".into(),
            team_id: TeamId::new(),
            team_slug: "acme".into(),
            amount: 100,
            currency: "RUB".into(),
            expiry_minutes: Some(0),
            description: None,
            customer_key: None,
            email: None,
            metadata: HashMap::new(),
            items: None,
            receipt: None,
        };
        let p = Payment::create(new.clone());
        let expected = p.created_at + Duration::minutes(DEFAULT_PAYMENT_EXPIRY_MINUTES);
        assert_eq!(p.expires_at, expected);

        new.expiry_minutes = None;
        let p = Payment::create(new);
        let expected = p.created_at + Duration::minutes(DEFAULT_PAYMENT_EXPIRY_MINUTES);
        assert_eq!(p.expires_at, expected);
    }

    #[test]
    fn status_timestamp_set_once() {
        let mut p = sample();
        let t1 = Utc::now();
        p.touch_status_timestamp(PaymentStatus::Authorized, t1);
        let t2 = t1 + Duration::seconds(5);
        p.touch_status_timestamp(PaymentStatus::Authorized, t2);
        assert_eq!(p.authorized_at, Some(t1));
        assert_eq!(p.updated_at, t2);
    }

    #[test]
    fn payment_ref_is_prefixed() {
        let p = sample();
        assert!(p.payment_ref().starts_with("pay_"));
    }
}
