//! Request correlation contexts
//!
//! Every mutating call opens a correlation context; services attach events
//! to it while the request fans out, and the orchestrator stamps the
//! completion. Contexts are in-memory and evicted after a grace window;
//! the persisted audit rows stay queryable by correlation ID.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use paygate_types::CorrelationId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Grace window before a completed context is evicted
pub const DEFAULT_CONTEXT_GRACE: Duration = Duration::from_secs(300);

/// One event attached to a correlation context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationEvent {
    pub at: DateTime<Utc>,
    pub service: String,
    pub message: String,
}

/// A request-scoped correlation context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationContext {
    pub correlation_id: CorrelationId,
    pub operation_type: String,
    pub entity_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    pub events: Vec<CorrelationEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// In-memory registry of live correlation contexts
pub struct CorrelationTracker {
    contexts: DashMap<CorrelationId, CorrelationContext>,
    grace: Duration,
}

impl CorrelationTracker {
    pub fn new() -> Self {
        Self::with_grace(DEFAULT_CONTEXT_GRACE)
    }

    pub fn with_grace(grace: Duration) -> Self {
        Self {
            contexts: DashMap::new(),
            grace,
        }
    }

    /// Open a context for one logical request
    pub fn begin(&self, operation_type: impl Into<String>, entity_id: impl Into<String>) -> CorrelationId {
        let correlation_id = CorrelationId::new();
        let context = CorrelationContext {
            correlation_id,
            operation_type: operation_type.into(),
            entity_id: entity_id.into(),
            started_at: Utc::now(),
            metadata: HashMap::new(),
            events: Vec::new(),
            completed_at: None,
            success: None,
            summary: None,
            duration_ms: None,
        };
        self.contexts.insert(correlation_id, context);
        correlation_id
    }

    /// Attach an event to a live context; unknown IDs are ignored so
    /// late-arriving events after eviction cannot fail the caller
    pub fn attach_event(&self, correlation_id: CorrelationId, service: &str, message: impl Into<String>) {
        if let Some(mut context) = self.contexts.get_mut(&correlation_id) {
            context.events.push(CorrelationEvent {
                at: Utc::now(),
                service: service.to_string(),
                message: message.into(),
            });
        }
    }

    /// Stamp completion on a context
    pub fn complete(&self, correlation_id: CorrelationId, success: bool, summary: impl Into<String>) {
        if let Some(mut context) = self.contexts.get_mut(&correlation_id) {
            let now = Utc::now();
            context.completed_at = Some(now);
            context.success = Some(success);
            context.summary = Some(summary.into());
            context.duration_ms = Some(
                (now - context.started_at).num_milliseconds().max(0) as u64,
            );
        }
    }

    pub fn get(&self, correlation_id: &CorrelationId) -> Option<CorrelationContext> {
        self.contexts.get(correlation_id).map(|c| c.clone())
    }

    /// Evict completed contexts past the grace window and stale contexts
    /// that never completed; returns how many were removed
    pub fn evict_stale(&self) -> usize {
        let now = Utc::now();
        let grace = chrono::Duration::from_std(self.grace).unwrap_or(chrono::Duration::seconds(300));
        let before = self.contexts.len();
        self.contexts.retain(|_, context| match context.completed_at {
            Some(completed) => now - completed < grace,
            // Unfinished contexts get double the grace before they are
            // considered abandoned.
            None => now - context.started_at < grace * 2,
        });
        before - self.contexts.len()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

impl Default for CorrelationTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lifecycle() {
        let tracker = CorrelationTracker::new();
        let id = tracker.begin("payment_init", "pay_1");
        tracker.attach_event(id, "rules", "evaluated 3 rules");
        tracker.attach_event(id, "machine", "INIT -> NEW");
        tracker.complete(id, true, "payment registered");

        let context = tracker.get(&id).unwrap();
        assert_eq!(context.events.len(), 2);
        assert_eq!(context.success, Some(true));
        assert!(context.duration_ms.is_some());
    }

    #[test]
    fn events_after_eviction_are_ignored() {
        let tracker = CorrelationTracker::with_grace(Duration::from_millis(0));
        let id = tracker.begin("payment_init", "pay_1");
        tracker.complete(id, true, "done");
        assert_eq!(tracker.evict_stale(), 1);
        // Must not panic or resurrect the context.
        tracker.attach_event(id, "late", "too late");
        assert!(tracker.get(&id).is_none());
    }

    #[test]
    fn incomplete_contexts_survive_one_grace() {
        let tracker = CorrelationTracker::with_grace(Duration::from_secs(60));
        let _id = tracker.begin("payment_init", "pay_1");
        assert_eq!(tracker.evict_stale(), 0);
        assert_eq!(tracker.len(), 1);
    }
}
