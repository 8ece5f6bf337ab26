//! Failed-authentication tracking with lockout
//!
//! Counts consecutive token failures per team and locks the team out once
//! the threshold is reached. State is in-process; the API layer mirrors
//! the counter and lock deadline onto the stored team record.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use paygate_types::{AUTH_LOCKOUT_MINUTES, MAX_FAILED_AUTH_ATTEMPTS};

#[derive(Debug, Clone)]
struct AttemptState {
    failed_count: u32,
    locked_until: Option<DateTime<Utc>>,
}

/// Per-team failure counters
pub struct FailedAuthTracker {
    attempts: DashMap<String, AttemptState>,
    max_failures: u32,
    lockout: Duration,
}

impl FailedAuthTracker {
    pub fn new() -> Self {
        Self {
            attempts: DashMap::new(),
            max_failures: MAX_FAILED_AUTH_ATTEMPTS,
            lockout: Duration::minutes(AUTH_LOCKOUT_MINUTES),
        }
    }

    /// Record a failure; returns the lock deadline if this failure tripped
    /// (or extended) a lockout
    pub fn record_failure(&self, team_slug: &str) -> Option<DateTime<Utc>> {
        let mut state = self
            .attempts
            .entry(team_slug.to_string())
            .or_insert(AttemptState {
                failed_count: 0,
                locked_until: None,
            });
        state.failed_count += 1;
        if state.failed_count >= self.max_failures {
            let until = Utc::now() + self.lockout;
            state.locked_until = Some(until);
            return Some(until);
        }
        None
    }

    /// Reset the counter after a successful validation
    pub fn record_success(&self, team_slug: &str) {
        self.attempts.remove(team_slug);
    }

    pub fn failed_count(&self, team_slug: &str) -> u32 {
        self.attempts
            .get(team_slug)
            .map(|s| s.failed_count)
            .unwrap_or(0)
    }

    /// Active lock deadline, if any; expired locks are cleared lazily
    pub fn locked_until(&self, team_slug: &str) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        if let Some(state) = self.attempts.get(team_slug) {
            match state.locked_until {
                Some(until) if now < until => return Some(until),
                Some(_) => {
                    drop(state);
                    // Lock expired; the team starts from a clean slate.
                    self.attempts.remove(team_slug);
                }
                None => {}
            }
        }
        None
    }
}

impl Default for FailedAuthTracker {
    fn default() -> Self {
        Self::new()
    }
}
