//! The merchant response envelope
//!
//! Mirrors the wire contract: `Success`, a numeric `ErrorCode` ("0" on
//! success), a localised message pair, and the payment fields relevant
//! to the call. Business errors still answer HTTP 200.

use paygate_types::{GatewayError, Payment, SUCCESS_CODE};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GatewayResponse {
    pub success: bool,
    pub error_code: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_localized: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl GatewayResponse {
    /// Success envelope for a payment
    pub fn ok(payment: &Payment) -> Self {
        Self {
            success: true,
            error_code: SUCCESS_CODE.to_string(),
            status: payment.status.as_str().to_string(),
            payment_id: Some(payment.payment_ref()),
            payment_url: payment.payment_url.clone(),
            order_id: Some(payment.order_id.clone()),
            amount: Some(payment.amount),
            message: None,
            message_localized: None,
            details: Vec::new(),
        }
    }

    /// Failure envelope carrying both locales and the error context
    pub fn error(err: &GatewayError) -> Self {
        Self {
            success: false,
            error_code: err.error_code().to_string(),
            status: "ERROR".to_string(),
            payment_id: None,
            payment_url: None,
            order_id: None,
            amount: None,
            message: Some(err.message_en().to_string()),
            message_localized: Some(err.message_ru().to_string()),
            details: err.details(),
        }
    }
}
