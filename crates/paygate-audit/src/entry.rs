//! Audit entries and integrity hashing

use chrono::{DateTime, SecondsFormat, Utc};
use paygate_types::{AuditEntryId, BusinessRule, CorrelationId, Payment, PaymentStatus, Team};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Types of auditable actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuditAction {
    /// Payment created and registered
    PaymentInitialized,
    /// Payment moved from one status to another
    StatusTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },
    /// A prior transition was intentionally reversed
    TransitionRolledBack,
    /// Refund accepted against a confirmed payment
    RefundAccepted { amount: i64 },
    /// Payment terminated by the expiry sweep
    PaymentExpired,
    /// Token validated successfully
    AuthenticationSucceeded,
    /// Token validation failed
    AuthenticationFailed,
    /// Team locked after repeated authentication failures
    TeamLocked,
    /// Business rule denied an operation
    RuleDenied,
    /// Business rule created or updated
    RuleChanged,
    /// Business rule removed
    RuleDeleted,
    /// Retry executed against a payment
    RetryExecuted { attempt: u32 },
    /// Payment moved to the dead-letter list after retry exhaustion
    RetryDeadLettered,
    /// Webhook notification dispatched
    NotificationSent,
    /// Audit rows archived by the retention sweep
    AuditArchived { count: usize },
    /// Configuration value changed at runtime
    ConfigurationChanged,
    /// Custom action
    Custom { action_type: String },
}

impl AuditAction {
    /// Stable name used in the integrity hash and query filters
    pub fn name(&self) -> &'static str {
        match self {
            Self::PaymentInitialized => "payment_initialized",
            Self::StatusTransition { .. } => "status_transition",
            Self::TransitionRolledBack => "transition_rolled_back",
            Self::RefundAccepted { .. } => "refund_accepted",
            Self::PaymentExpired => "payment_expired",
            Self::AuthenticationSucceeded => "authentication_succeeded",
            Self::AuthenticationFailed => "authentication_failed",
            Self::TeamLocked => "team_locked",
            Self::RuleDenied => "rule_denied",
            Self::RuleChanged => "rule_changed",
            Self::RuleDeleted => "rule_deleted",
            Self::RetryExecuted { .. } => "retry_executed",
            Self::RetryDeadLettered => "retry_dead_lettered",
            Self::NotificationSent => "notification_sent",
            Self::AuditArchived { .. } => "audit_archived",
            Self::ConfigurationChanged => "configuration_changed",
            Self::Custom { .. } => "custom",
        }
    }

    /// Severity implied by the action
    pub fn severity(&self) -> AuditSeverity {
        match self {
            Self::AuthenticationFailed | Self::RuleDenied => AuditSeverity::Warning,
            Self::TeamLocked | Self::RetryDeadLettered => AuditSeverity::Error,
            _ => AuditSeverity::Info,
        }
    }

    /// Category implied by the action
    pub fn category(&self) -> AuditCategory {
        match self {
            Self::AuthenticationSucceeded | Self::AuthenticationFailed | Self::TeamLocked => {
                AuditCategory::Authentication
            }
            Self::RuleChanged | Self::RuleDeleted | Self::ConfigurationChanged => {
                AuditCategory::Configuration
            }
            Self::RuleDenied => AuditCategory::Security,
            Self::RetryExecuted { .. } | Self::RetryDeadLettered => AuditCategory::Retry,
            Self::AuditArchived { .. } => AuditCategory::System,
            _ => AuditCategory::Payment,
        }
    }

    /// Whether entries for this action are sensitive by default
    pub fn is_sensitive(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationSucceeded | Self::AuthenticationFailed | Self::TeamLocked
        )
    }
}

/// Severity of an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Broad grouping of audit entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Payment,
    Security,
    Authentication,
    Configuration,
    Retry,
    System,
}

/// Entities the audit service can snapshot
///
/// Keeps the audit service independent of concrete entity types; each
/// aggregate provides its identity and a structured serialisation with
/// null-omission (the entity's serde derives handle that).
pub trait AuditSnapshot {
    fn entity_id(&self) -> String;
    fn entity_type(&self) -> &'static str;
    fn snapshot(&self) -> serde_json::Value;
}

impl AuditSnapshot for Payment {
    fn entity_id(&self) -> String {
        self.payment_ref()
    }

    fn entity_type(&self) -> &'static str {
        "payment"
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl AuditSnapshot for Team {
    fn entity_id(&self) -> String {
        self.team_slug.clone()
    }

    fn entity_type(&self) -> &'static str {
        "team"
    }

    fn snapshot(&self) -> serde_json::Value {
        // The merchant secret never lands in an audit row.
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(map) = value.as_object_mut() {
            map.remove("password");
        }
        value
    }
}

impl AuditSnapshot for BusinessRule {
    fn entity_id(&self) -> String {
        self.id.to_prefixed_string()
    }

    fn entity_type(&self) -> &'static str {
        "business_rule"
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// An audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub entity_id: String,
    pub entity_type: String,
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_slug: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    pub category: AuditCategory,
    pub severity: AuditSeverity,
    pub is_sensitive: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_before: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_after: Option<serde_json::Value>,

    /// SHA-256 over the canonical fields, lowercase hex
    pub integrity_hash: String,

    pub is_archived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl AuditEntry {
    /// Start building an entry; severity, category, and sensitivity derive
    /// from the action and can be tightened afterwards.
    pub fn new(action: AuditAction, entity_id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        let severity = action.severity();
        let category = action.category();
        let is_sensitive = action.is_sensitive();
        Self {
            id: AuditEntryId::new(),
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            action,
            user_id: None,
            team_slug: None,
            timestamp: Utc::now(),
            details: String::new(),
            category,
            severity,
            is_sensitive,
            correlation_id: None,
            request_id: None,
            session_id: None,
            ip_address: None,
            user_agent: None,
            risk_score: None,
            snapshot_before: None,
            snapshot_after: None,
            integrity_hash: String::new(),
            is_archived: false,
            archived_at: None,
        }
    }

    /// Build an entry for a snapshot-capable entity
    pub fn for_entity(action: AuditAction, entity: &dyn AuditSnapshot) -> Self {
        let mut entry = Self::new(action, entity.entity_id(), entity.entity_type());
        entry.snapshot_after = Some(entity.snapshot());
        entry
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_team(mut self, team_slug: impl Into<String>) -> Self {
        self.team_slug = Some(team_slug.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_snapshot_before(mut self, snapshot: serde_json::Value) -> Self {
        self.snapshot_before = Some(snapshot);
        self
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Compute the integrity hash and return the finished entry
    pub fn seal(mut self) -> Self {
        self.integrity_hash = self.compute_hash();
        self
    }

    /// Canonical hash input:
    /// `entityId|entityType|action|userId|timestamp|details|snapshotAfter`
    pub fn compute_hash(&self) -> String {
        let snapshot = self
            .snapshot_after
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_default();
        let content = format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.entity_id,
            self.entity_type,
            self.action.name(),
            self.user_id.as_deref().unwrap_or(""),
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.details,
            snapshot,
        );
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Recompute and compare; a mismatch flags tampering
    pub fn verify(&self) -> bool {
        self.integrity_hash == self.compute_hash()
    }
}
