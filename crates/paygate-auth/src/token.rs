//! Canonical-hash token construction
//!
//! The token over a request is `sha256(concat(values))` where the values
//! are the scalar request parameters plus the team password, ordered by
//! key with ordinal byte-wise comparison and concatenated without
//! separators. `Token` itself, `Receipt`, and non-scalar values never
//! participate.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use subtle::ConstantTimeEq;

/// Key carrying the submitted token
pub const TOKEN_KEY: &str = "Token";

/// Key excluded from canonicalisation alongside the token
pub const RECEIPT_KEY: &str = "Receipt";

/// Key under which the team secret is mixed into the canonical set
pub const PASSWORD_KEY: &str = "Password";

/// Scalar form of a JSON value, `None` for maps and lists
///
/// Booleans become `true`/`false`, numbers keep their invariant decimal
/// form, and a scalar null contributes an empty string.
pub fn scalar_form(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "true" } else { "false" }.to_string()),
        Value::Null => Some(String::new()),
        Value::Object(_) | Value::Array(_) => None,
    }
}

/// Canonical scalar form for timestamps built programmatically
/// (webhook payload signing): ISO-8601, millisecond precision, UTC suffix
pub fn timestamp_form(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Compute the token for a parameter map and team password
pub fn generate_token(params: &Map<String, Value>, password: &str) -> String {
    // BTreeMap keys compare byte-wise, which is exactly the ordinal
    // ordering the scheme requires.
    let mut canonical: BTreeMap<&str, String> = BTreeMap::new();
    for (key, value) in params {
        if key == TOKEN_KEY || key == RECEIPT_KEY {
            continue;
        }
        if let Some(scalar) = scalar_form(value) {
            canonical.insert(key.as_str(), scalar);
        }
    }
    canonical.insert(PASSWORD_KEY, password.to_string());

    let mut hasher = Sha256::new();
    for value in canonical.values() {
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Recompute and compare in constant time
pub fn verify_token(params: &Map<String, Value>, password: &str, submitted: &str) -> bool {
    let expected = generate_token(params, password);
    expected.as_bytes().ct_eq(submitted.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_params() -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("TeamSlug".into(), json!("acme"));
        params.insert("OrderId".into(), json!("O-1"));
        params.insert("Amount".into(), json!(150000));
        params.insert("Currency".into(), json!("RUB"));
        params
    }

    #[test]
    fn deterministic_regardless_of_insertion_order() {
        let mut shuffled = Map::new();
        shuffled.insert("Currency".into(), json!("RUB"));
        shuffled.insert("Amount".into(), json!(150000));
        shuffled.insert("OrderId".into(), json!("O-1"));
        shuffled.insert("TeamSlug".into(), json!("acme"));
        assert_eq!(
            generate_token(&base_params(), "secret"),
            generate_token(&shuffled, "secret")
        );
    }

    #[test]
    fn token_and_receipt_do_not_participate() {
        let mut params = base_params();
        let token = generate_token(&params, "secret");
        params.insert("Token".into(), json!("whatever"));
        params.insert("Receipt".into(), json!("opaque-blob"));
        assert_eq!(generate_token(&params, "secret"), token);
    }

    #[test]
    fn non_scalars_are_excluded() {
        let mut params = base_params();
        let token = generate_token(&params, "secret");
        params.insert("Items".into(), json!([{"name": "widget"}]));
        params.insert("Data".into(), json!({"k": "v"}));
        assert_eq!(generate_token(&params, "secret"), token);
    }

    #[test]
    fn scalar_coercions() {
        assert_eq!(scalar_form(&json!(true)).unwrap(), "true");
        assert_eq!(scalar_form(&json!(false)).unwrap(), "false");
        assert_eq!(scalar_form(&json!(150000)).unwrap(), "150000");
        assert_eq!(scalar_form(&json!(1.5)).unwrap(), "1.5");
        assert_eq!(scalar_form(&Value::Null).unwrap(), "");
        assert!(scalar_form(&json!([])).is_none());
        assert!(scalar_form(&json!({})).is_none());
    }

    #[test]
    fn any_scalar_change_moves_the_token() {
        let params = base_params();
        let token = generate_token(&params, "secret");

        let mut changed = params.clone();
        changed.insert("Amount".into(), json!(150001));
        assert_ne!(generate_token(&changed, "secret"), token);

        assert_ne!(generate_token(&params, "other-secret"), token);
    }

    #[test]
    fn verify_roundtrip() {
        let params = base_params();
        let token = generate_token(&params, "secret");
        assert!(verify_token(&params, "secret", &token));
        assert!(!verify_token(&params, "secret", "deadbeef"));
        assert!(!verify_token(&params, "wrong", &token));
    }

    #[test]
    fn token_is_lowercase_hex() {
        let token = generate_token(&base_params(), "secret");
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn timestamp_form_is_utc_with_millis() {
        let ts = DateTime::parse_from_rfc3339("2026-03-01T10:20:30.123Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(timestamp_form(ts), "2026-03-01T10:20:30.123Z");
    }
}
