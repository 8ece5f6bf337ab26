//! Route definitions

use crate::{admin, handlers, state::AppState};
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the full router: merchant surface plus nested admin surface
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/init", post(handlers::init))
        .route("/confirm", post(handlers::confirm))
        .route("/cancel", post(handlers::cancel))
        .route("/refund", post(handlers::refund))
        .route("/getState", post(handlers::get_state))
        .route("/check", post(handlers::check))
        .nest("/admin", admin_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn admin_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rules", get(admin::list_rules).post(admin::create_rule))
        .route("/rules/:id", delete(admin::delete_rule))
        .route("/locks", get(admin::list_locks))
        .route("/payments/:id/expire", post(admin::expire_payment))
        .route("/audit/verify", get(admin::verify_audit))
}
