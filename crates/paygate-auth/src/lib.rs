//! Paygate Auth - Merchant request authentication
//!
//! Every merchant call carries a `Token`: a deterministic SHA-256 over the
//! canonical form of the request parameters plus the team's API password.
//! Validation is constant-time; repeated failures lock the team out.

pub mod lockout;
pub mod token;

pub use lockout::*;
pub use token::*;

use chrono::Utc;
use paygate_types::{GatewayError, Result, Team};
use serde_json::{Map, Value};
use tracing::warn;

/// Authenticates merchant requests against their team secret
pub struct TokenAuthenticator {
    tracker: FailedAuthTracker,
}

impl TokenAuthenticator {
    pub fn new() -> Self {
        Self {
            tracker: FailedAuthTracker::new(),
        }
    }

    /// Validate the `Token` field of a request body against the team
    ///
    /// The lockout window is checked first, then the token itself. A failed
    /// validation counts toward the lockout; a successful one resets it.
    pub fn authenticate(&self, team: &Team, params: &Map<String, Value>) -> Result<()> {
        let now = Utc::now();

        if let Some(until) = self.tracker.locked_until(&team.team_slug) {
            if now < until {
                return Err(GatewayError::TeamLocked {
                    team_slug: team.team_slug.clone(),
                    until: until.to_rfc3339(),
                });
            }
        }
        if team.is_locked(now) {
            return Err(GatewayError::TeamLocked {
                team_slug: team.team_slug.clone(),
                until: team.locked_until.map(|u| u.to_rfc3339()).unwrap_or_default(),
            });
        }

        let submitted = params
            .get(TOKEN_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::validation(TOKEN_KEY, "missing or not a string"))?;

        if verify_token(params, &team.password, submitted) {
            self.tracker.record_success(&team.team_slug);
            Ok(())
        } else {
            if let Some(until) = self.tracker.record_failure(&team.team_slug) {
                warn!(team = %team.team_slug, %until, "team locked after repeated token failures");
                return Err(GatewayError::TeamLocked {
                    team_slug: team.team_slug.clone(),
                    until: until.to_rfc3339(),
                });
            }
            Err(GatewayError::authentication("token mismatch"))
        }
    }

    /// Consecutive failures recorded for a team
    pub fn failed_count(&self, team_slug: &str) -> u32 {
        self.tracker.failed_count(team_slug)
    }

    /// Lockout deadline for a team, if one is active
    pub fn locked_until(&self, team_slug: &str) -> Option<chrono::DateTime<Utc>> {
        self.tracker.locked_until(team_slug)
    }
}

impl Default for TokenAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paygate_types::MAX_FAILED_AUTH_ATTEMPTS;
    use serde_json::json;

    fn request(team: &Team) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("TeamSlug".into(), json!(team.team_slug));
        params.insert("OrderId".into(), json!("O-1"));
        params.insert("Amount".into(), json!(150000));
        params.insert("Currency".into(), json!("RUB"));
        let token = generate_token(&params, &team.password);
        params.insert("Token".into(), json!(token));
        params
    }

    #[test]
    fn valid_token_passes() {
        let team = Team::new("acme", "Acme", "secret");
        let auth = TokenAuthenticator::new();
        assert!(auth.authenticate(&team, &request(&team)).is_ok());
        assert_eq!(auth.failed_count("acme"), 0);
    }

    #[test]
    fn tampered_amount_fails_and_counts() {
        let team = Team::new("acme", "Acme", "secret");
        let auth = TokenAuthenticator::new();
        let mut params = request(&team);
        params.insert("Amount".into(), json!(150001));
        let err = auth.authenticate(&team, &params).unwrap_err();
        assert_eq!(err.error_code(), "1004");
        assert_eq!(auth.failed_count("acme"), 1);
    }

    #[test]
    fn lockout_after_repeated_failures() {
        let team = Team::new("acme", "Acme", "secret");
        let auth = TokenAuthenticator::new();
        let mut params = request(&team);
        params.insert("Amount".into(), json!(999));

        for _ in 0..MAX_FAILED_AUTH_ATTEMPTS - 1 {
            let err = auth.authenticate(&team, &params).unwrap_err();
            assert_eq!(err.error_code(), "1004");
        }
        // The fifth failure trips the lock.
        let err = auth.authenticate(&team, &params).unwrap_err();
        assert_eq!(err.error_code(), "1013");

        // Even a now-valid request is rejected while locked.
        let err = auth.authenticate(&team, &request(&team)).unwrap_err();
        assert_eq!(err.error_code(), "1013");
    }

    #[test]
    fn success_resets_counter() {
        let team = Team::new("acme", "Acme", "secret");
        let auth = TokenAuthenticator::new();
        let mut bad = request(&team);
        bad.insert("Amount".into(), json!(999));
        auth.authenticate(&team, &bad).unwrap_err();
        auth.authenticate(&team, &bad).unwrap_err();
        assert_eq!(auth.failed_count("acme"), 2);
        auth.authenticate(&team, &request(&team)).unwrap();
        assert_eq!(auth.failed_count("acme"), 0);
    }

    #[test]
    fn stored_lock_is_honoured() {
        let mut team = Team::new("acme", "Acme", "secret");
        team.locked_until = Some(Utc::now() + chrono::Duration::minutes(10));
        let auth = TokenAuthenticator::new();
        let err = auth.authenticate(&team, &request(&team)).unwrap_err();
        assert_eq!(err.error_code(), "1013");
    }
}
