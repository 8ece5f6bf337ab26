//! PostgreSQL-backed audit log
//!
//! Core filter columns are flat for indexing; the full entry rides along
//! as a document so the integrity hash always verifies against exactly
//! what was written. Shares the pool (and the `audit_log` table) with the
//! payment store.

use crate::{AuditEntry, AuditLog, AuditQuery};
use chrono::{DateTime, Utc};
use paygate_types::{AuditEntryId, GatewayError, Result};
use sqlx::{PgPool, Row};

fn persistence(err: sqlx::Error) -> GatewayError {
    GatewayError::Persistence {
        message: err.to_string(),
    }
}

fn decode_body(body: serde_json::Value) -> Result<AuditEntry> {
    serde_json::from_value(body).map_err(|e| GatewayError::Persistence {
        message: e.to_string(),
    })
}

/// Audit log persisted to PostgreSQL
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AuditLog for PgAuditLog {
    async fn append(&self, entry: AuditEntry) -> Result<AuditEntryId> {
        if entry.integrity_hash.is_empty() {
            return Err(GatewayError::internal("audit entry appended without seal()"));
        }
        let id = entry.id;
        let body = serde_json::to_value(&entry).map_err(|e| GatewayError::Persistence {
            message: e.to_string(),
        })?;
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, entity_id, entity_type, action, timestamp,
                correlation_id, is_sensitive, is_archived, archived_at, body)
            VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, NULL, $8)
            "#,
        )
        .bind(entry.id.0)
        .bind(&entry.entity_id)
        .bind(&entry.entity_type)
        .bind(entry.action.name())
        .bind(entry.timestamp)
        .bind(entry.correlation_id.map(|c| c.0))
        .bind(entry.is_sensitive)
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(id)
    }

    async fn get(&self, id: &AuditEntryId) -> Result<AuditEntry> {
        let row = sqlx::query("SELECT body, is_archived, archived_at FROM audit_log WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence)?
            .ok_or_else(|| GatewayError::not_found("audit entry", id))?;
        let mut entry = decode_body(row.get("body"))?;
        entry.is_archived = row.get("is_archived");
        entry.archived_at = row.get("archived_at");
        Ok(entry)
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
        // Coarse filters run in SQL; the long tail of filters runs over the
        // decoded bodies, same as the in-memory backend.
        let rows = sqlx::query(
            r#"
            SELECT body, is_archived, archived_at FROM audit_log
            WHERE ($1::text IS NULL OR entity_id = $1)
              AND ($2::text IS NULL OR entity_type = $2)
              AND ($3::text IS NULL OR action = $3)
              AND ($4::uuid IS NULL OR correlation_id = $4)
              AND ($5::timestamptz IS NULL OR timestamp >= $5)
              AND ($6::timestamptz IS NULL OR timestamp <= $6)
              AND ($7::boolean IS NULL OR is_sensitive = $7)
              AND ($8::boolean IS NULL OR is_archived = $8)
            ORDER BY timestamp DESC
            "#,
        )
        .bind(&query.entity_id)
        .bind(&query.entity_type)
        .bind(&query.action)
        .bind(query.correlation_id.map(|c| c.0))
        .bind(query.from_date)
        .bind(query.to_date)
        .bind(query.is_sensitive)
        .bind(query.is_archived)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let mut entry = decode_body(row.get("body"))?;
            entry.is_archived = row.get("is_archived");
            entry.archived_at = row.get("archived_at");
            if query.matches(&entry) {
                hits.push(entry);
            }
        }
        let take = query.take.unwrap_or(usize::MAX);
        Ok(hits.into_iter().skip(query.skip).take(take).collect())
    }

    async fn archive_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let result = sqlx::query(
            "UPDATE audit_log SET is_archived = TRUE, archived_at = $1 \
             WHERE is_archived = FALSE AND timestamp < $2",
        )
        .bind(Utc::now())
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(result.rows_affected() as usize)
    }

    async fn verify_integrity(&self) -> Result<Vec<AuditEntryId>> {
        let rows = sqlx::query("SELECT body FROM audit_log")
            .fetch_all(&self.pool)
            .await
            .map_err(persistence)?;
        let mut tampered = Vec::new();
        for row in rows {
            let entry = decode_body(row.get("body"))?;
            if !entry.verify() {
                tampered.push(entry.id);
            }
        }
        Ok(tampered)
    }
}
