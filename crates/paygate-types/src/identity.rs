//! Identity types for Paygate
//!
//! All identity types are strongly typed wrappers around UUIDs to prevent
//! accidental mixing of different ID types. The prefixed string form of an
//! ID is its external, merchant-facing representation.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Convert to prefixed string
            pub fn to_prefixed_string(&self) -> String {
                format!("{}_{}", $prefix, self.0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl AsRef<Uuid> for $name {
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }
    };
}

// Aggregate identity types
define_id_type!(PaymentId, "pay", "Unique identifier for a payment; its prefixed form is the merchant-facing PaymentId");
define_id_type!(TeamId, "team", "Unique identifier for a merchant team");
define_id_type!(CustomerId, "cust", "Unique identifier for a customer");

// Record identity types
define_id_type!(TransitionId, "trn", "Unique identifier for a state transition record");
define_id_type!(AuditEntryId, "audit", "Unique identifier for an audit log entry");
define_id_type!(RuleId, "rule", "Unique identifier for a business rule");

// Request-scoped identity types
define_id_type!(CorrelationId, "corr", "Correlation identifier tying audit events of one logical request together");
define_id_type!(RequestId, "req", "Unique identifier for a single inbound request");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_roundtrip() {
        let id = PaymentId::new();
        let s = id.to_prefixed_string();
        assert!(s.starts_with("pay_"));
        assert_eq!(PaymentId::parse(&s).unwrap(), id);
    }

    #[test]
    fn parse_accepts_bare_uuid() {
        let id = TeamId::new();
        assert_eq!(TeamId::parse(&id.0.to_string()).unwrap(), id);
    }

    #[test]
    fn ids_are_distinct() {
        assert_ne!(PaymentId::new(), PaymentId::new());
    }
}
