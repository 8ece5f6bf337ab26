//! Server configuration
//!
//! Layered: defaults, then an optional TOML file, then `PAYGATE__`
//! environment variables. Hot reload re-runs the same layering when the
//! feature flag permits it.

use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentLimitsSection {
    /// Minor units
    pub global_min_payment_amount: i64,
    /// Minor units
    pub global_max_payment_amount: i64,
    /// Minor units per team per calendar day
    pub global_daily_payment_limit: i64,
}

impl Default for PaymentLimitsSection {
    fn default() -> Self {
        Self {
            global_min_payment_amount: 100,
            global_max_payment_amount: 100_000_000,
            global_daily_payment_limit: 1_000_000_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    pub max_history_records: usize,
    pub max_query_results: usize,
    /// Entries at or above this severity raise alerts
    pub alert_severity_threshold: String,
    pub retention_days: i64,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            max_history_records: 100_000,
            max_query_results: 1_000,
            alert_severity_threshold: "error".into(),
            retention_days: 90,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ErrorTrackingSection {
    pub default_retention_period_days: i64,
    pub correlation_time_window_secs: u64,
    pub spike_detection_threshold: u32,
    pub sensitive_context_keys: Vec<String>,
}

impl Default for ErrorTrackingSection {
    fn default() -> Self {
        Self {
            default_retention_period_days: 30,
            correlation_time_window_secs: 300,
            spike_detection_threshold: 50,
            sensitive_context_keys: vec!["password".into(), "token".into(), "pan".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentFormSection {
    pub base_url: String,
    pub lifecycle_integration_enabled: bool,
    pub rollback_on_failure: bool,
}

impl Default for PaymentFormSection {
    fn default() -> Self {
        Self {
            base_url: "https://pay.example.com".into(),
            lifecycle_integration_enabled: true,
            rollback_on_failure: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeatureFlagsSection {
    pub enable_configuration_hot_reload: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub payment_limits: PaymentLimitsSection,
    pub audit: AuditSection,
    pub error_tracking: ErrorTrackingSection,
    pub payment_form: PaymentFormSection,
    pub feature_flags: FeatureFlagsSection,
    /// PostgreSQL URL; the in-memory store serves when absent
    pub database_url: Option<String>,
}

impl ServerConfig {
    /// Load with defaults < file < environment precedence
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        let settings = builder
            .add_source(Environment::with_prefix("PAYGATE").separator("__"))
            .build()?;
        let mut config: ServerConfig = settings.try_deserialize()?;
        if config.database_url.is_none() {
            config.database_url = std::env::var("DATABASE_URL").ok();
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.server.port, 8080);
        assert!(config.payment_limits.global_min_payment_amount > 0);
        assert_eq!(config.audit.retention_days, 90);
        assert!(!config.feature_flags.enable_configuration_hot_reload);
    }
}
