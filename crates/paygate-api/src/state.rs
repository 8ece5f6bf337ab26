//! Shared application state

use paygate_audit::AuditLog;
use paygate_auth::TokenAuthenticator;
use paygate_lifecycle::LifecycleService;
use paygate_lock::LockManager;
use paygate_rules::RuleEngine;
use paygate_store::{PaymentStore, TeamStore};
use std::sync::Arc;

/// Everything the handlers reach for
pub struct AppState {
    pub lifecycle: Arc<LifecycleService>,
    pub store: Arc<dyn PaymentStore>,
    pub teams: Arc<dyn TeamStore>,
    pub auth: Arc<TokenAuthenticator>,
    pub rules: Arc<RuleEngine>,
    pub locks: Arc<LockManager>,
    pub audit: Arc<dyn AuditLog>,
}
