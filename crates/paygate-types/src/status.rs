//! Payment status lifecycle
//!
//! The status enumeration is closed; the permitted transitions between
//! statuses are owned by the state machine crate. This module only knows
//! which statuses exist, their wire form, and which are terminal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a payment in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Created, not yet visible to the cardholder
    Init,
    /// Registered and awaiting cardholder interaction
    New,
    /// Hosted payment form rendered to the cardholder
    FormShowed,
    /// Cardholder is choosing a payment instrument
    Onechoosevision,
    /// Instrument chosen, authorization about to start
    Finishauthorize,
    /// Authorization in flight
    Authorizing,
    /// Funds held on the cardholder account
    Authorized,
    /// Authorization attempt failed
    AuthFail,
    /// Capture requested
    Confirm,
    /// Capture in flight
    Confirming,
    /// Funds captured
    Confirmed,
    /// Cancellation requested
    Cancel,
    /// Cancellation in flight
    Cancelling,
    /// Cancelled before capture
    Cancelled,
    /// Authorization reversal in flight
    Reversing,
    /// Authorization reversed
    Reversed,
    /// Refund in flight
    Refunding,
    /// Fully refunded
    Refunded,
    /// Partially refunded, refundable balance remains
    PartialRefunded,
    /// Rejected after exhausted authorization attempts
    Rejected,
    /// Expired before completion
    Expired,
    /// Expired past the hard processing deadline
    DeadlineExpired,
}

impl PaymentStatus {
    /// Check if this is a terminal state
    ///
    /// CONFIRMED is not in this set: it may still advance into the refund
    /// path and is gated by the transition table instead.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::Reversed
                | Self::Refunded
                | Self::Rejected
                | Self::Expired
                | Self::DeadlineExpired
        )
    }

    /// Check if the payment has settled successfully
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Refunded | Self::PartialRefunded)
    }

    /// Wire form of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::New => "NEW",
            Self::FormShowed => "FORM_SHOWED",
            Self::Onechoosevision => "ONECHOOSEVISION",
            Self::Finishauthorize => "FINISHAUTHORIZE",
            Self::Authorizing => "AUTHORIZING",
            Self::Authorized => "AUTHORIZED",
            Self::AuthFail => "AUTH_FAIL",
            Self::Confirm => "CONFIRM",
            Self::Confirming => "CONFIRMING",
            Self::Confirmed => "CONFIRMED",
            Self::Cancel => "CANCEL",
            Self::Cancelling => "CANCELLING",
            Self::Cancelled => "CANCELLED",
            Self::Reversing => "REVERSING",
            Self::Reversed => "REVERSED",
            Self::Refunding => "REFUNDING",
            Self::Refunded => "REFUNDED",
            Self::PartialRefunded => "PARTIAL_REFUNDED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
            Self::DeadlineExpired => "DEADLINE_EXPIRED",
        }
    }

    /// Every status, in declaration order
    pub fn all() -> &'static [PaymentStatus] {
        &[
            Self::Init,
            Self::New,
            Self::FormShowed,
            Self::Onechoosevision,
            Self::Finishauthorize,
            Self::Authorizing,
            Self::Authorized,
            Self::AuthFail,
            Self::Confirm,
            Self::Confirming,
            Self::Confirmed,
            Self::Cancel,
            Self::Cancelling,
            Self::Cancelled,
            Self::Reversing,
            Self::Reversed,
            Self::Refunding,
            Self::Refunded,
            Self::PartialRefunded,
            Self::Rejected,
            Self::Expired,
            Self::DeadlineExpired,
        ]
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown payment status: {s}"))
    }
}
