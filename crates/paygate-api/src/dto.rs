//! Merchant request bodies
//!
//! PascalCase on the wire. `Token` is consumed by the authenticator
//! before these are bound, so the DTOs carry it only for completeness.

use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InitRequest {
    pub team_slug: String,
    pub order_id: String,
    /// Minor units
    pub amount: i64,
    /// ISO-4217
    pub currency: String,
    pub description: Option<String>,
    pub email: Option<String>,
    pub customer_key: Option<String>,
    pub items: Option<serde_json::Value>,
    pub receipt: Option<serde_json::Value>,
    /// Free-form merchant metadata
    pub data: Option<HashMap<String, String>>,
    /// Minutes until the payment expires
    pub payment_expiry: Option<i64>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfirmRequest {
    pub team_slug: String,
    pub payment_id: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CancelRequest {
    pub team_slug: String,
    pub payment_id: String,
    pub reason: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RefundRequest {
    pub team_slug: String,
    pub payment_id: String,
    /// Minor units
    pub amount: i64,
    pub reason: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetStateRequest {
    pub team_slug: String,
    pub payment_id: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CheckRequest {
    pub team_slug: String,
    pub payment_id: Option<String>,
    pub order_id: Option<String>,
    pub token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn init_request_binds_pascal_case() {
        let body = json!({
            "TeamSlug": "acme",
            "OrderId": "O-1",
            "Amount": 150000,
            "Currency": "RUB",
            "PaymentExpiry": 30,
            "Data": {"country": "RU"},
            "Token": "deadbeef"
        });
        let request: InitRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.team_slug, "acme");
        assert_eq!(request.amount, 150_000);
        assert_eq!(request.payment_expiry, Some(30));
        assert_eq!(request.data.unwrap().get("country").unwrap(), "RU");
    }
}
