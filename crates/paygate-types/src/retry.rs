//! Retry attempt records
//!
//! One row per retry execution; the total number of rows for a payment is
//! bounded by the selected policy's maximum attempts.

use crate::{PaymentId, PaymentStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A recorded retry execution against one payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub payment_id: PaymentId,
    /// Monotonic across invocations of the retry service
    pub attempt_number: u32,
    pub attempted_at: DateTime<Utc>,
    pub is_success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Wall-clock duration of the processing delegate, in milliseconds
    pub duration_ms: u64,
    pub status_before: PaymentStatus,
    pub status_after: PaymentStatus,
    pub policy_name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}
