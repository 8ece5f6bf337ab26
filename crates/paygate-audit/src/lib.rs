//! Paygate Audit - Immutable audit log and correlation pipeline
//!
//! All consequential actions produce audit entries. The audit log is
//! append-only; each entry carries a SHA-256 integrity hash over its
//! canonical fields, and every entry written in service of one logical
//! request shares that request's correlation ID.

pub mod correlation;
pub mod entry;
pub mod log;
pub mod postgres;

pub use correlation::*;
pub use entry::*;
pub use log::*;
pub use postgres::PgAuditLog;
