//! Paygate Types - Canonical domain types for the payment gateway
//!
//! This crate contains all foundational types for Paygate with zero
//! dependencies on other paygate crates. It defines the complete type
//! system for:
//!
//! - Identity types (PaymentId, TeamId, TransitionId, etc.)
//! - The payment aggregate and its status lifecycle
//! - Transition and retry-attempt records
//! - Merchant team and customer accounts
//! - Business rules
//! - The gateway error taxonomy with numeric API codes

pub mod error;
pub mod identity;
pub mod payment;
pub mod retry;
pub mod rule;
pub mod status;
pub mod team;
pub mod transition;

pub use error::*;
pub use identity::*;
pub use payment::*;
pub use retry::*;
pub use rule::*;
pub use status::*;
pub use team::*;
pub use transition::*;

/// Version of the Paygate types schema
pub const TYPES_VERSION: &str = "0.1.0";
