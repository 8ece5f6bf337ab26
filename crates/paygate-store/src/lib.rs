//! Paygate Store - Persistence layer
//!
//! The store is the sole source of truth for payment state. Contracts are
//! async traits; the in-memory backend serves tests and single-node runs,
//! the PostgreSQL backend serves production. Writes of a payment together
//! with its transition record are atomic in both backends.

pub mod memory;
pub mod postgres;
mod traits;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use traits::*;
