//! Error types for Paygate
//!
//! Every failure surfaced by the core carries an abstract kind plus a
//! numeric API code with English and Russian messages and context flags
//! (category, retryability, whether the merchant can act on it, whether
//! support should be contacted).

use crate::{PaymentStatus, TransitionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for Paygate operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Numeric code signalling success on the wire
pub const SUCCESS_CODE: &str = "0";

/// Alternate success code retained for older merchant integrations
pub const SUCCESS_CODE_ALT: &str = "2000";

/// Broad classification of an error, used for audit severity mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Authentication,
    Authorization,
    NotFound,
    Conflict,
    Processing,
    Infrastructure,
    System,
}

/// Paygate error types
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Malformed or missing input
    #[error("Validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Token mismatch or unknown credentials
    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    /// Team locked out after repeated authentication failures
    #[error("Team {team_slug} is locked until {until}")]
    TeamLocked { team_slug: String, until: String },

    /// Business rule denied the operation
    #[error("Business rules denied the operation: {}", violations.join("; "))]
    RuleViolation { violations: Vec<String> },

    /// Entity does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    /// Duplicate (team, orderId) pair
    #[error("Order {order_id} already exists for team {team_slug}")]
    DuplicateOrder { team_slug: String, order_id: String },

    /// Another writer holds the per-resource lease
    #[error("Could not acquire lock on {resource}")]
    LockConflict { resource: String },

    /// State machine rejected the transition
    #[error("Transition from {from} to {to} is not permitted")]
    InvalidTransition { from: PaymentStatus, to: PaymentStatus },

    /// Rollback target does not match the payment's current state
    #[error("Transition {transition_id} cannot be rolled back: {reason}")]
    RollbackRejected { transition_id: TransitionId, reason: String },

    /// Refund amount outside the refundable window
    #[error("Invalid amount {requested}: refundable balance is {refundable}")]
    InvalidAmount { requested: i64, refundable: i64 },

    /// Dependency failure that may succeed on retry
    #[error("Transient failure: {message}")]
    Transient { message: String },

    /// Write failed after an in-memory change; the operation did not happen
    #[error("Persistence failure: {message}")]
    Persistence { message: String },

    /// Operation aborted by its cancellation signal
    #[error("Operation cancelled")]
    Cancelled,

    /// Operation exceeded its deadline
    #[error("Operation timed out: {message}")]
    Timeout { message: String },

    /// Unexpected failure; surfaced as a generic code
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    /// Create a validation error
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an authentication error
    pub fn authentication(reason: impl Into<String>) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Create a transient error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Numeric API code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "1001",
            Self::DuplicateOrder { .. } => "1002",
            Self::NotFound { .. } => "1003",
            Self::Authentication { .. } => "1004",
            Self::RuleViolation { .. } => "1005",
            Self::InvalidTransition { .. } | Self::RollbackRejected { .. } => "1006",
            Self::LockConflict { .. } => "1007",
            Self::InvalidAmount { .. } => "1008",
            Self::Transient { .. } => "1009",
            Self::Persistence { .. } => "1010",
            Self::Cancelled => "1011",
            Self::Timeout { .. } => "1012",
            Self::TeamLocked { .. } => "1013",
            Self::Internal { .. } => "9999",
        }
    }

    /// Broad category, used for audit severity mapping
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } | Self::InvalidAmount { .. } => ErrorCategory::Validation,
            Self::Authentication { .. } | Self::TeamLocked { .. } => ErrorCategory::Authentication,
            Self::RuleViolation { .. } => ErrorCategory::Authorization,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::DuplicateOrder { .. } | Self::LockConflict { .. } => ErrorCategory::Conflict,
            Self::InvalidTransition { .. } | Self::RollbackRejected { .. } => {
                ErrorCategory::Processing
            }
            Self::Transient { .. } | Self::Persistence { .. } => ErrorCategory::Infrastructure,
            Self::Cancelled | Self::Timeout { .. } | Self::Internal { .. } => ErrorCategory::System,
        }
    }

    /// Whether a retry may succeed without any other change
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::LockConflict { .. } | Self::Transient { .. } | Self::Timeout { .. }
        )
    }

    /// Whether the merchant can correct the request themselves
    pub fn user_action_required(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::InvalidAmount { .. }
                | Self::DuplicateOrder { .. }
                | Self::Authentication { .. }
        )
    }

    /// Whether the merchant should contact support
    pub fn requires_support_contact(&self) -> bool {
        matches!(self, Self::TeamLocked { .. } | Self::Internal { .. })
    }

    /// Localised merchant-facing message (English)
    pub fn message_en(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "Request validation failed",
            Self::DuplicateOrder { .. } => "Order already registered",
            Self::NotFound { .. } => "Requested entity was not found",
            Self::Authentication { .. } => "Token validation failed",
            Self::RuleViolation { .. } => "Operation denied by business rules",
            Self::InvalidTransition { .. } | Self::RollbackRejected { .. } => {
                "Operation is not allowed in the current payment state"
            }
            Self::LockConflict { .. } => "Payment is being processed, retry shortly",
            Self::InvalidAmount { .. } => "Amount exceeds the refundable balance",
            Self::Transient { .. } => "Service temporarily unavailable",
            Self::Persistence { .. } => "Operation could not be saved",
            Self::Cancelled => "Operation was cancelled",
            Self::Timeout { .. } => "Operation timed out",
            Self::TeamLocked { .. } => "Account is temporarily locked, contact support",
            Self::Internal { .. } => "Internal gateway error",
        }
    }

    /// Localised merchant-facing message (Russian)
    pub fn message_ru(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "Ошибка валидации запроса",
            Self::DuplicateOrder { .. } => "Заказ уже зарегистрирован",
            Self::NotFound { .. } => "Запрошенный объект не найден",
            Self::Authentication { .. } => "Ошибка проверки токена",
            Self::RuleViolation { .. } => "Операция отклонена бизнес-правилами",
            Self::InvalidTransition { .. } | Self::RollbackRejected { .. } => {
                "Операция недопустима в текущем статусе платежа"
            }
            Self::LockConflict { .. } => "Платёж обрабатывается, повторите попытку позже",
            Self::InvalidAmount { .. } => "Сумма превышает доступный остаток для возврата",
            Self::Transient { .. } => "Сервис временно недоступен",
            Self::Persistence { .. } => "Не удалось сохранить операцию",
            Self::Cancelled => "Операция отменена",
            Self::Timeout { .. } => "Истекло время ожидания операции",
            Self::TeamLocked { .. } => "Аккаунт временно заблокирован, обратитесь в поддержку",
            Self::Internal { .. } => "Внутренняя ошибка шлюза",
        }
    }

    /// Detail lines for the response envelope, when the error carries any
    pub fn details(&self) -> Vec<String> {
        match self {
            Self::RuleViolation { violations } => violations.clone(),
            Self::Validation { field, reason } => vec![format!("{field}: {reason}")],
            Self::InvalidAmount { requested, refundable } => {
                vec![format!("requested={requested}, refundable={refundable}")]
            }
            _ => Vec::new(),
        }
    }
}
