//! Audit log contract and the in-memory store

use crate::{AuditCategory, AuditEntry, AuditSeverity};
use chrono::{DateTime, Utc};
use paygate_types::{AuditEntryId, CorrelationId, GatewayError, Result};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Default retention before entries are archived, in days
pub const DEFAULT_RETENTION_DAYS: i64 = 90;

/// Query filter over the audit log
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub entity_id: Option<String>,
    pub entity_type: Option<String>,
    pub action: Option<String>,
    pub user_id: Option<String>,
    pub team_slug: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub min_severity: Option<AuditSeverity>,
    pub category: Option<AuditCategory>,
    pub correlation_id: Option<CorrelationId>,
    pub request_id: Option<String>,
    pub is_sensitive: Option<bool>,
    pub is_archived: Option<bool>,
    pub skip: usize,
    pub take: Option<usize>,
}

impl AuditQuery {
    pub fn for_entity(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            ..Default::default()
        }
    }

    pub fn for_correlation(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            ..Default::default()
        }
    }

    pub fn with_take(mut self, take: usize) -> Self {
        self.take = Some(take);
        self
    }

    /// Whether an entry satisfies every set filter
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if self.entity_id.as_deref().is_some_and(|v| v != entry.entity_id) {
            return false;
        }
        if self.entity_type.as_deref().is_some_and(|v| v != entry.entity_type) {
            return false;
        }
        if self.action.as_deref().is_some_and(|v| v != entry.action.name()) {
            return false;
        }
        if self.user_id.is_some() && self.user_id != entry.user_id {
            return false;
        }
        if self.team_slug.is_some() && self.team_slug != entry.team_slug {
            return false;
        }
        if self.from_date.is_some_and(|from| entry.timestamp < from) {
            return false;
        }
        if self.to_date.is_some_and(|to| entry.timestamp > to) {
            return false;
        }
        if self.min_severity.is_some_and(|min| entry.severity < min) {
            return false;
        }
        if self.category.is_some_and(|c| c != entry.category) {
            return false;
        }
        if self.correlation_id.is_some() && self.correlation_id != entry.correlation_id {
            return false;
        }
        if self.request_id.is_some() && self.request_id != entry.request_id {
            return false;
        }
        if self.is_sensitive.is_some_and(|v| v != entry.is_sensitive) {
            return false;
        }
        if self.is_archived.is_some_and(|v| v != entry.is_archived) {
            return false;
        }
        true
    }
}

/// Append-only audit log
#[async_trait::async_trait]
pub trait AuditLog: Send + Sync {
    /// Append a sealed entry; entries without an integrity hash are refused
    async fn append(&self, entry: AuditEntry) -> Result<AuditEntryId>;

    /// Get an entry by ID
    async fn get(&self, id: &AuditEntryId) -> Result<AuditEntry>;

    /// Query entries, newest first
    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>>;

    /// Mark entries older than the cutoff as archived; returns the count
    async fn archive_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Recompute every integrity hash; returns the IDs that fail
    async fn verify_integrity(&self) -> Result<Vec<AuditEntryId>>;
}

/// In-memory audit log for tests and single-node runs
pub struct InMemoryAuditLog {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
    /// Hard cap retained in memory; oldest archived rows fall off first
    max_entries: usize,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::with_capacity(100_000)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            max_entries,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, entry: AuditEntry) -> Result<AuditEntryId> {
        if entry.integrity_hash.is_empty() {
            return Err(GatewayError::internal("audit entry appended without seal()"));
        }
        let id = entry.id;
        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_entries {
            // Drop the oldest archived row before refusing growth.
            if let Some(pos) = entries.iter().position(|e| e.is_archived) {
                entries.remove(pos);
            } else {
                warn!("audit log at capacity with no archived rows to evict");
            }
        }
        entries.push(entry);
        Ok(id)
    }

    async fn get(&self, id: &AuditEntryId) -> Result<AuditEntry> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.id == *id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found("audit entry", id))
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        let mut hits: Vec<AuditEntry> = entries.iter().filter(|e| query.matches(e)).cloned().collect();
        hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let take = query.take.unwrap_or(usize::MAX);
        Ok(hits.into_iter().skip(query.skip).take(take).collect())
    }

    async fn archive_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let mut archived = 0;
        for entry in entries.iter_mut() {
            if !entry.is_archived && entry.timestamp < cutoff {
                entry.is_archived = true;
                entry.archived_at = Some(now);
                archived += 1;
            }
        }
        Ok(archived)
    }

    async fn verify_integrity(&self) -> Result<Vec<AuditEntryId>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| !e.verify())
            .map(|e| e.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuditAction;
    use chrono::Duration;

    fn entry(action: AuditAction, entity: &str) -> AuditEntry {
        AuditEntry::new(action, entity, "payment").seal()
    }

    #[tokio::test]
    async fn append_and_query_by_entity() {
        let log = InMemoryAuditLog::new();
        log.append(entry(AuditAction::PaymentInitialized, "pay_1")).await.unwrap();
        log.append(entry(AuditAction::PaymentExpired, "pay_2")).await.unwrap();

        let hits = log.query(&AuditQuery::for_entity("pay_1")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_id, "pay_1");
    }

    #[tokio::test]
    async fn unsealed_entry_is_refused() {
        let log = InMemoryAuditLog::new();
        let unsealed = AuditEntry::new(AuditAction::PaymentInitialized, "pay_1", "payment");
        assert!(log.append(unsealed).await.is_err());
    }

    #[tokio::test]
    async fn correlation_query_spans_entities() {
        let log = InMemoryAuditLog::new();
        let corr = CorrelationId::new();
        log.append(
            AuditEntry::new(AuditAction::PaymentInitialized, "pay_1", "payment")
                .with_correlation(corr)
                .seal(),
        )
        .await
        .unwrap();
        log.append(
            AuditEntry::new(AuditAction::AuthenticationSucceeded, "acme", "team")
                .with_correlation(corr)
                .seal(),
        )
        .await
        .unwrap();
        log.append(entry(AuditAction::PaymentExpired, "pay_9")).await.unwrap();

        let hits = log.query(&AuditQuery::for_correlation(corr)).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn archive_sets_flags_only_once() {
        let log = InMemoryAuditLog::new();
        let mut old = entry(AuditAction::PaymentInitialized, "pay_1");
        old.timestamp = Utc::now() - Duration::days(100);
        let old = old.seal();
        log.append(old).await.unwrap();
        log.append(entry(AuditAction::PaymentInitialized, "pay_2")).await.unwrap();

        let cutoff = Utc::now() - Duration::days(DEFAULT_RETENTION_DAYS);
        assert_eq!(log.archive_older_than(cutoff).await.unwrap(), 1);
        assert_eq!(log.archive_older_than(cutoff).await.unwrap(), 0);

        let archived = log
            .query(&AuditQuery {
                is_archived: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(archived.len(), 1);
        // Archive flags do not break the integrity hash.
        assert!(archived[0].verify());
    }

    #[tokio::test]
    async fn integrity_sweep_finds_tampered_rows() {
        let log = InMemoryAuditLog::new();
        let sealed = entry(AuditAction::PaymentInitialized, "pay_1");
        let id = sealed.id;
        log.append(sealed).await.unwrap();
        assert!(log.verify_integrity().await.unwrap().is_empty());

        // Tamper behind the trait's back.
        log.entries.write().await[0].details = "forged".into();
        assert_eq!(log.verify_integrity().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn pagination() {
        let log = InMemoryAuditLog::new();
        for i in 0..10 {
            log.append(entry(AuditAction::PaymentInitialized, &format!("pay_{i}"))).await.unwrap();
        }
        let page = log
            .query(&AuditQuery {
                skip: 4,
                take: Some(3),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 3);
    }
}
