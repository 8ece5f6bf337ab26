//! Admin surface
//!
//! Rule CRUD, lock inspection, manual expiry, and audit integrity
//! verification. Everything goes through the same services as the
//! merchant surface; nothing here bypasses the state machine. Meant to
//! be bound to an internal listener, not the public one.

use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use paygate_types::{BusinessRule, RuleAction, RuleId, RuleType, TeamId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

type AdminResult<T> = std::result::Result<T, (StatusCode, Json<serde_json::Value>)>;

fn admin_error(err: paygate_types::GatewayError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match err.error_code() {
        "1003" => StatusCode::NOT_FOUND,
        "1001" => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "code": err.error_code(), "message": err.to_string() })))
}

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub team_slug: Option<String>,
    pub name: String,
    pub rule_type: RuleType,
    pub action: RuleAction,
    pub priority: Option<u32>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub allowed_currencies: Vec<String>,
    #[serde(default)]
    pub allowed_countries: Vec<String>,
    #[serde(default)]
    pub allowed_payment_methods: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct LockView {
    pub resource: String,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

/// `GET /admin/rules`
pub async fn list_rules(State(state): State<Arc<AppState>>) -> AdminResult<Json<Vec<BusinessRule>>> {
    state.rules.list_rules().await.map(Json).map_err(admin_error)
}

/// `POST /admin/rules`
pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRuleRequest>,
) -> AdminResult<Json<BusinessRule>> {
    let team_id: Option<TeamId> = match &request.team_slug {
        Some(slug) => Some(
            state
                .teams
                .get_team_by_slug(slug)
                .await
                .map_err(admin_error)?
                .id,
        ),
        None => None,
    };
    let mut rule = BusinessRule::new(team_id, request.name, request.rule_type, request.action);
    if let Some(priority) = request.priority {
        rule.priority = priority;
    }
    rule.valid_from = request.valid_from;
    rule.valid_to = request.valid_to;
    rule.parameters = request.parameters;
    rule.allowed_currencies = request.allowed_currencies;
    rule.allowed_countries = request.allowed_countries;
    rule.allowed_payment_methods = request.allowed_payment_methods;

    state.rules.create_rule(rule.clone()).await.map_err(admin_error)?;
    Ok(Json(rule))
}

/// `DELETE /admin/rules/:id`
pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AdminResult<StatusCode> {
    let id = RuleId::parse(&id)
        .map_err(|_| admin_error(paygate_types::GatewayError::validation("id", "malformed rule id")))?;
    state.rules.delete_rule(&id).await.map_err(admin_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /admin/locks` - live leases
pub async fn list_locks(State(state): State<Arc<AppState>>) -> Json<Vec<LockView>> {
    Json(
        state
            .locks
            .active_leases()
            .into_iter()
            .map(|(resource, lease)| LockView {
                resource,
                owner: lease.owner.to_string(),
                expires_at: lease.expires_at,
            })
            .collect(),
    )
}

/// `POST /admin/payments/:id/expire` - manual expiry through the lifecycle
pub async fn expire_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AdminResult<Json<serde_json::Value>> {
    let payment_id = paygate_types::PaymentId::parse(&id).map_err(|_| {
        admin_error(paygate_types::GatewayError::validation("id", "malformed payment reference"))
    })?;
    let outcome = state.lifecycle.expire(&payment_id).await.map_err(admin_error)?;
    Ok(Json(match outcome {
        Some(outcome) => json!({
            "expired": true,
            "transition_id": outcome.transition_id.to_prefixed_string(),
            "from": outcome.from_status.as_str(),
        }),
        None => json!({ "expired": false, "reason": "payment is terminal or captured" }),
    }))
}

/// `GET /admin/audit/verify` - recompute every integrity hash
pub async fn verify_audit(State(state): State<Arc<AppState>>) -> AdminResult<Json<serde_json::Value>> {
    let tampered = state.audit.verify_integrity().await.map_err(admin_error)?;
    Ok(Json(json!({
        "intact": tampered.is_empty(),
        "tampered": tampered.iter().map(|id| id.to_prefixed_string()).collect::<Vec<_>>(),
    })))
}
