//! State transition records
//!
//! One record per state change; the ordered sequence of records for a
//! payment reproduces its full status history.

use crate::{PaymentId, PaymentStatus, TransitionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Authority attributed to system-initiated transitions
pub const SYSTEM_USER: &str = "system";

/// A recorded state change of one payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub id: TransitionId,
    pub payment_id: PaymentId,
    pub from_status: PaymentStatus,
    pub to_status: PaymentStatus,
    pub transitioned_at: DateTime<Utc>,
    /// Initiating user; `None` is attributed to [`SYSTEM_USER`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Operation-scoped context carried into the record
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    /// Whether this transition intentionally reverses a prior one
    pub is_rollback: bool,
    /// The transition being reversed, when `is_rollback` is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_of: Option<TransitionId>,
}

impl TransitionRecord {
    /// Effective authority for this transition
    pub fn authority(&self) -> &str {
        self.user_id.as_deref().unwrap_or(SYSTEM_USER)
    }
}

/// Result of a successful transition, returned to callers for audit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub transition_id: TransitionId,
    pub from_status: PaymentStatus,
    pub to_status: PaymentStatus,
    pub transitioned_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
}
