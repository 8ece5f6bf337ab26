//! Paygate API - Merchant HTTP surface
//!
//! JSON over HTTPS with PascalCase bodies. Every merchant call carries a
//! `Token` computed over its own parameters, so handlers take the raw
//! JSON map first, authenticate against it, and only then bind the typed
//! request. Business failures answer 200 with `Success=false` and a
//! numeric `ErrorCode`; transport-level failures are the only non-200s.

pub mod admin;
pub mod dto;
pub mod envelope;
pub mod handlers;
pub mod routes;
pub mod state;

pub use envelope::GatewayResponse;
pub use routes::create_router;
pub use state::AppState;
