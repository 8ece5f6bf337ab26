//! Merchant endpoint handlers
//!
//! Shared shape: take the raw JSON map, look up the team, validate the
//! token over the map, bind the typed request, dispatch the lifecycle
//! operation, answer with the envelope.

use crate::dto::{
    CancelRequest, CheckRequest, ConfirmRequest, GetStateRequest, InitRequest, RefundRequest,
};
use crate::envelope::GatewayResponse;
use crate::state::AppState;
use axum::{extract::State, Json};
use chrono::Utc;
use paygate_types::{GatewayError, NewPayment, Payment, PaymentId, Result, Team};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Authenticate the raw body and return the team it belongs to
///
/// Counter and lock state are mirrored onto the stored team so lockouts
/// survive a restart.
async fn authenticate(state: &AppState, body: &Map<String, Value>) -> Result<Team> {
    let team_slug = body
        .get("TeamSlug")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::validation("TeamSlug", "missing or not a string"))?;
    let team = state
        .teams
        .get_team_by_slug(team_slug)
        .await
        .map_err(|_| GatewayError::authentication("unknown team"))?;

    let verdict = state.auth.authenticate(&team, body);
    if verdict.is_err() {
        let mut stored = team.clone();
        stored.failed_auth_count = state.auth.failed_count(team_slug);
        stored.locked_until = state.auth.locked_until(team_slug).or(stored.locked_until);
        let _ = state.teams.update_team(&stored).await;
    } else if team.failed_auth_count > 0 {
        let mut stored = team.clone();
        stored.failed_auth_count = 0;
        stored.locked_until = None;
        let _ = state.teams.update_team(&stored).await;
    }
    verdict.map(|()| team)
}

fn bind<T: serde::de::DeserializeOwned>(body: Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(body))
        .map_err(|e| GatewayError::validation("body", e.to_string()))
}

/// Resolve a merchant-supplied payment reference owned by the team
async fn owned_payment(state: &AppState, team: &Team, payment_ref: &str) -> Result<Payment> {
    let payment_id = PaymentId::parse(payment_ref)
        .map_err(|_| GatewayError::validation("PaymentId", "malformed payment reference"))?;
    let payment = state.store.get_payment(&payment_id).await?;
    if payment.team_id != team.id {
        // Do not leak other teams' payment references.
        return Err(GatewayError::not_found("payment", payment_ref));
    }
    Ok(payment)
}

fn respond(result: Result<Payment>) -> Json<GatewayResponse> {
    match result {
        Ok(payment) => Json(GatewayResponse::ok(&payment)),
        Err(err) => {
            debug!("merchant call failed: {err}");
            Json(GatewayResponse::error(&err))
        }
    }
}

/// `POST /init` - register a payment intent
pub async fn init(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Map<String, Value>>,
) -> Json<GatewayResponse> {
    let result = async {
        let team = authenticate(&state, &body).await?;
        let request: InitRequest = bind(body)?;
        state
            .lifecycle
            .initialize(NewPayment {
                order_id: request.order_id,
                team_id: team.id,
                team_slug: team.team_slug,
                amount: request.amount,
                currency: request.currency,
                expiry_minutes: request.payment_expiry,
                description: request.description,
                customer_key: request.customer_key,
                email: request.email,
                metadata: request.data.unwrap_or_default(),
                items: request.items,
                receipt: request.receipt,
            })
            .await
    }
    .await;
    respond(result)
}

/// `POST /confirm` - capture an authorized payment
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Map<String, Value>>,
) -> Json<GatewayResponse> {
    let result = async {
        let team = authenticate(&state, &body).await?;
        let request: ConfirmRequest = bind(body)?;
        let payment = owned_payment(&state, &team, &request.payment_id).await?;
        state.lifecycle.confirm(&payment.id, Some(&team.team_slug)).await
    }
    .await;
    respond(result)
}

/// `POST /cancel` - cancel a payment
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Map<String, Value>>,
) -> Json<GatewayResponse> {
    let result = async {
        let team = authenticate(&state, &body).await?;
        let request: CancelRequest = bind(body)?;
        let payment = owned_payment(&state, &team, &request.payment_id).await?;
        let reason = request.reason.as_deref().unwrap_or("merchant cancel");
        state
            .lifecycle
            .cancel(&payment.id, reason, Some(&team.team_slug))
            .await
    }
    .await;
    respond(result)
}

/// `POST /refund` - refund part or all of a confirmed payment
pub async fn refund(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Map<String, Value>>,
) -> Json<GatewayResponse> {
    let result = async {
        let team = authenticate(&state, &body).await?;
        let request: RefundRequest = bind(body)?;
        let payment = owned_payment(&state, &team, &request.payment_id).await?;
        let reason = request.reason.as_deref().unwrap_or("merchant refund");
        state
            .lifecycle
            .refund(&payment.id, request.amount, reason, Some(&team.team_slug))
            .await
    }
    .await;
    respond(result)
}

/// `POST /getState` - current status of a payment
pub async fn get_state(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Map<String, Value>>,
) -> Json<GatewayResponse> {
    let result = async {
        let team = authenticate(&state, &body).await?;
        let request: GetStateRequest = bind(body)?;
        owned_payment(&state, &team, &request.payment_id).await
    }
    .await;
    respond(result)
}

/// `POST /check` - look a payment up by reference or order id
pub async fn check(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Map<String, Value>>,
) -> Json<GatewayResponse> {
    let result = async {
        let team = authenticate(&state, &body).await?;
        let request: CheckRequest = bind(body)?;
        if let Some(payment_ref) = &request.payment_id {
            return owned_payment(&state, &team, payment_ref).await;
        }
        let order_id = request
            .order_id
            .ok_or_else(|| GatewayError::validation("OrderId", "PaymentId or OrderId is required"))?;
        state
            .store
            .find_by_order(&team.id, &order_id)
            .await?
            .ok_or_else(|| GatewayError::not_found("payment", order_id))
    }
    .await;
    let mut response = respond(result);
    // `check` also tells the merchant whether the deadline has passed.
    if response.0.success {
        if let Some(payment_ref) = response.0.payment_id.clone() {
            if let Ok(id) = PaymentId::parse(&payment_ref) {
                if let Ok(expired) = state.lifecycle.is_expired(&id).await {
                    response.0.details = if expired {
                        vec![format!("expired as of {}", Utc::now().to_rfc3339())]
                    } else {
                        Vec::new()
                    };
                }
            }
        }
    }
    response
}
