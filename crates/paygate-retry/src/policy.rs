//! Named retry policies
//!
//! A policy bounds attempts and shapes the backoff curve. Retryable error
//! sets are policy-provided; unknown codes default to non-retryable.
//! Policy selection by amount band is deterministic.

use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Amounts at or above this, in minor units, retry conservatively
pub const HIGH_VALUE_THRESHOLD: i64 = 1_000_000;

/// Error codes every stock policy treats as retryable
fn stock_retryable_codes() -> HashSet<String> {
    ["1007", "1009", "1012"].iter().map(|s| s.to_string()).collect()
}

/// Custom backoff override; takes the 1-based attempt number
pub type DelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// A named retry configuration
#[derive(Clone)]
pub struct RetryPolicy {
    pub name: String,
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Symmetric jitter fraction applied to each delay
    pub jitter: f64,
    pub retryable_codes: HashSet<String>,
    pub custom_delay: Option<DelayFn>,
}

impl RetryPolicy {
    /// `default`: 3 attempts, 1 s initial, x2.0, capped at 30 min, 10% jitter
    pub fn standard() -> Self {
        Self {
            name: "default".into(),
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30 * 60),
            jitter: 0.1,
            retryable_codes: stock_retryable_codes(),
            custom_delay: None,
        }
    }

    /// `aggressive`: 5 attempts, 0.5 s initial, x1.5, capped at 10 min
    pub fn aggressive() -> Self {
        Self {
            name: "aggressive".into(),
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            multiplier: 1.5,
            max_delay: Duration::from_secs(10 * 60),
            jitter: 0.1,
            retryable_codes: stock_retryable_codes(),
            custom_delay: None,
        }
    }

    /// `conservative`: 2 attempts, 5 s initial, x3.0, capped at 1 h
    pub fn conservative() -> Self {
        Self {
            name: "conservative".into(),
            max_attempts: 2,
            initial_delay: Duration::from_secs(5),
            multiplier: 3.0,
            max_delay: Duration::from_secs(60 * 60),
            jitter: 0.1,
            retryable_codes: stock_retryable_codes(),
            custom_delay: None,
        }
    }

    /// Look up a stock policy by name
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::standard()),
            "aggressive" => Some(Self::aggressive()),
            "conservative" => Some(Self::conservative()),
            _ => None,
        }
    }

    /// Deterministic selection by amount band
    pub fn for_amount(amount: i64) -> Self {
        if amount >= HIGH_VALUE_THRESHOLD {
            Self::conservative()
        } else {
            Self::standard()
        }
    }

    pub fn with_custom_delay(mut self, delay: DelayFn) -> Self {
        self.custom_delay = Some(delay);
        self
    }

    /// Whether the error code may succeed on retry under this policy
    pub fn is_retryable(&self, code: &str) -> bool {
        self.retryable_codes.contains(code)
    }

    /// Backoff before the given 1-based attempt
    ///
    /// Exponential from the initial delay, capped, with symmetric jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if let Some(custom) = &self.custom_delay {
            return custom(attempt);
        }
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let jittered = if self.jitter > 0.0 {
            let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
            capped * factor
        } else {
            capped
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }
}
