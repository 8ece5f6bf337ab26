//! Merchant team and customer accounts

use crate::{CustomerId, TeamId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Failed token validations tolerated before the team is locked
pub const MAX_FAILED_AUTH_ATTEMPTS: u32 = 5;

/// Lockout duration applied after too many failed validations, in minutes
pub const AUTH_LOCKOUT_MINUTES: i64 = 30;

/// A merchant account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    /// Stable external identifier used on every API call
    pub team_slug: String,
    pub display_name: String,
    pub active: bool,

    /// Merchant API password, the shared secret of the token scheme.
    /// At-rest encryption is delegated to the storage layer.
    pub password: String,

    /// Consecutive failed token validations
    pub failed_auth_count: u32,
    /// Set while the team is locked out of the API
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,

    /// Per-team floor on payment amounts, minor units
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_payment_amount: Option<i64>,
    /// Per-team ceiling on payment amounts, minor units
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_payment_amount: Option<i64>,
    /// Per-team daily volume ceiling, minor units
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_payment_limit: Option<i64>,

    /// ISO-4217 codes this team may charge in; empty allows all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_currencies: Vec<String>,

    /// Merchant-inbound webhook endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    pub retries_enabled: bool,
    pub fraud_checks_enabled: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Team {
    /// Construct an active team with default feature flags
    pub fn new(team_slug: impl Into<String>, display_name: impl Into<String>, password: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TeamId::new(),
            team_slug: team_slug.into(),
            display_name: display_name.into(),
            active: true,
            password: password.into(),
            failed_auth_count: 0,
            locked_until: None,
            min_payment_amount: None,
            max_payment_amount: None,
            daily_payment_limit: None,
            supported_currencies: Vec::new(),
            webhook_url: None,
            retries_enabled: true,
            fraud_checks_enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the team is currently locked out
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    /// Whether this team may charge in the given currency
    pub fn supports_currency(&self, currency: &str) -> bool {
        self.supported_currencies.is_empty()
            || self.supported_currencies.iter().any(|c| c == currency)
    }
}

/// A customer known to a merchant team
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    /// Merchant-chosen key, unique per team
    pub customer_key: String,
    pub team_id: TeamId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Blocked customers fail CUSTOMER_RESTRICTION rules
    pub blocked: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn lock_window() {
        let mut team = Team::new("acme", "Acme", "secret");
        let now = Utc::now();
        assert!(!team.is_locked(now));
        team.locked_until = Some(now + Duration::minutes(AUTH_LOCKOUT_MINUTES));
        assert!(team.is_locked(now));
        assert!(!team.is_locked(now + Duration::minutes(AUTH_LOCKOUT_MINUTES + 1)));
    }

    #[test]
    fn empty_currency_list_allows_all() {
        let mut team = Team::new("acme", "Acme", "secret");
        assert!(team.supports_currency("RUB"));
        team.supported_currencies = vec!["RUB".into()];
        assert!(team.supports_currency("RUB"));
        assert!(!team.supports_currency("USD"));
    }
}
