//! PostgreSQL-backed store
//!
//! Flat columns for everything queried by the hot paths; business rules
//! are stored as documents keyed by team. The payment + transition write
//! runs in one transaction.

use crate::{CustomerStore, PaymentStore, RuleStore, TeamStore};
use chrono::{DateTime, Utc};
use paygate_types::{
    BusinessRule, Customer, CustomerId, GatewayError, Payment, PaymentId, PaymentStatus, Result,
    RetryAttempt, RuleId, Team, TeamId, TransitionId, TransitionRecord,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;
use tracing::info;

/// DDL applied idempotently at startup
pub const SCHEMA: &str = include_str!("schema.sql");

fn persistence(err: sqlx::Error) -> GatewayError {
    match &err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => GatewayError::Transient {
            message: err.to_string(),
        },
        _ => GatewayError::Persistence {
            message: err.to_string(),
        },
    }
}

fn parse_status(s: &str) -> Result<PaymentStatus> {
    s.parse::<PaymentStatus>()
        .map_err(|e| GatewayError::Persistence { message: e })
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: uuid::Uuid,
    order_id: String,
    team_id: uuid::Uuid,
    team_slug: String,
    amount: i64,
    currency: String,
    refunded_amount: i64,
    refund_count: i32,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    initialized_at: Option<DateTime<Utc>>,
    form_showed_at: Option<DateTime<Utc>>,
    authorizing_at: Option<DateTime<Utc>>,
    authorized_at: Option<DateTime<Utc>>,
    confirming_at: Option<DateTime<Utc>>,
    confirmed_at: Option<DateTime<Utc>>,
    cancelling_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    reversed_at: Option<DateTime<Utc>>,
    refunding_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
    rejected_at: Option<DateTime<Utc>>,
    expired_at: Option<DateTime<Utc>>,
    authorization_attempts: i32,
    max_allowed_attempts: i32,
    error_code: Option<String>,
    error_message: Option<String>,
    payment_url: Option<String>,
    description: Option<String>,
    customer_key: Option<String>,
    email: Option<String>,
    metadata: serde_json::Value,
    items: Option<serde_json::Value>,
    receipt: Option<serde_json::Value>,
}

impl PaymentRow {
    fn into_payment(self) -> Result<Payment> {
        let metadata: HashMap<String, String> =
            serde_json::from_value(self.metadata).unwrap_or_default();
        Ok(Payment {
            id: PaymentId::from_uuid(self.id),
            order_id: self.order_id,
            team_id: TeamId::from_uuid(self.team_id),
            team_slug: self.team_slug,
            amount: self.amount,
            currency: self.currency,
            refunded_amount: self.refunded_amount,
            refund_count: self.refund_count as u32,
            status: parse_status(&self.status)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
            initialized_at: self.initialized_at,
            form_showed_at: self.form_showed_at,
            authorizing_at: self.authorizing_at,
            authorized_at: self.authorized_at,
            confirming_at: self.confirming_at,
            confirmed_at: self.confirmed_at,
            cancelling_at: self.cancelling_at,
            cancelled_at: self.cancelled_at,
            reversed_at: self.reversed_at,
            refunding_at: self.refunding_at,
            refunded_at: self.refunded_at,
            rejected_at: self.rejected_at,
            expired_at: self.expired_at,
            authorization_attempts: self.authorization_attempts as u32,
            max_allowed_attempts: self.max_allowed_attempts as u32,
            error_code: self.error_code,
            error_message: self.error_message,
            payment_url: self.payment_url,
            description: self.description,
            customer_key: self.customer_key,
            email: self.email,
            metadata,
            items: self.items,
            receipt: self.receipt,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransitionRow {
    id: uuid::Uuid,
    payment_id: uuid::Uuid,
    from_status: String,
    to_status: String,
    transitioned_at: DateTime<Utc>,
    user_id: Option<String>,
    reason: Option<String>,
    context: serde_json::Value,
    is_rollback: bool,
    rollback_of: Option<uuid::Uuid>,
}

impl TransitionRow {
    fn into_record(self) -> Result<TransitionRecord> {
        Ok(TransitionRecord {
            id: TransitionId::from_uuid(self.id),
            payment_id: PaymentId::from_uuid(self.payment_id),
            from_status: parse_status(&self.from_status)?,
            to_status: parse_status(&self.to_status)?,
            transitioned_at: self.transitioned_at,
            user_id: self.user_id,
            reason: self.reason,
            context: serde_json::from_value(self.context).unwrap_or_default(),
            is_rollback: self.is_rollback,
            rollback_of: self.rollback_of.map(TransitionId::from_uuid),
        })
    }
}

#[derive(sqlx::FromRow)]
struct RetryRow {
    payment_id: uuid::Uuid,
    attempt_number: i32,
    attempted_at: DateTime<Utc>,
    is_success: bool,
    error_code: Option<String>,
    error_message: Option<String>,
    duration_ms: i64,
    status_before: String,
    status_after: String,
    policy_name: String,
    metadata: serde_json::Value,
}

impl RetryRow {
    fn into_attempt(self) -> Result<RetryAttempt> {
        Ok(RetryAttempt {
            payment_id: PaymentId::from_uuid(self.payment_id),
            attempt_number: self.attempt_number as u32,
            attempted_at: self.attempted_at,
            is_success: self.is_success,
            error_code: self.error_code,
            error_message: self.error_message,
            duration_ms: self.duration_ms as u64,
            status_before: parse_status(&self.status_before)?,
            status_after: parse_status(&self.status_after)?,
            policy_name: self.policy_name,
            metadata: serde_json::from_value(self.metadata).unwrap_or_default(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct TeamRow {
    id: uuid::Uuid,
    team_slug: String,
    display_name: String,
    active: bool,
    password: String,
    failed_auth_count: i32,
    locked_until: Option<DateTime<Utc>>,
    min_payment_amount: Option<i64>,
    max_payment_amount: Option<i64>,
    daily_payment_limit: Option<i64>,
    supported_currencies: serde_json::Value,
    webhook_url: Option<String>,
    retries_enabled: bool,
    fraud_checks_enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TeamRow {
    fn into_team(self) -> Team {
        Team {
            id: TeamId::from_uuid(self.id),
            team_slug: self.team_slug,
            display_name: self.display_name,
            active: self.active,
            password: self.password,
            failed_auth_count: self.failed_auth_count as u32,
            locked_until: self.locked_until,
            min_payment_amount: self.min_payment_amount,
            max_payment_amount: self.max_payment_amount,
            daily_payment_limit: self.daily_payment_limit,
            supported_currencies: serde_json::from_value(self.supported_currencies)
                .unwrap_or_default(),
            webhook_url: self.webhook_url,
            retries_enabled: self.retries_enabled,
            fraud_checks_enabled: self.fraud_checks_enabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const PAYMENT_COLUMNS: &str = "id, order_id, team_id, team_slug, amount, currency, \
     refunded_amount, refund_count, status, created_at, updated_at, expires_at, \
     initialized_at, form_showed_at, authorizing_at, authorized_at, confirming_at, \
     confirmed_at, cancelling_at, cancelled_at, reversed_at, refunding_at, refunded_at, \
     rejected_at, expired_at, authorization_attempts, max_allowed_attempts, error_code, \
     error_message, payment_url, description, customer_key, email, metadata, items, receipt";

/// PostgreSQL store
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and apply the schema
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await
            .map_err(persistence)?;
        let store = Self { pool };
        store.apply_schema().await?;
        info!("connected to postgres store");
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, shared with the audit log
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn apply_schema(&self) -> Result<()> {
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(persistence)?;
        }
        Ok(())
    }

    async fn upsert_payment_tx(
        tx: &mut Transaction<'_, Postgres>,
        payment: &Payment,
    ) -> std::result::Result<(), sqlx::Error> {
        let metadata = serde_json::to_value(&payment.metadata).unwrap_or(serde_json::Value::Null);
        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, team_id, team_slug, amount, currency,
                refunded_amount, refund_count, status, created_at, updated_at, expires_at,
                initialized_at, form_showed_at, authorizing_at, authorized_at, confirming_at,
                confirmed_at, cancelling_at, cancelled_at, reversed_at, refunding_at, refunded_at,
                rejected_at, expired_at, authorization_attempts, max_allowed_attempts, error_code,
                error_message, payment_url, description, customer_key, email, metadata, items, receipt)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33,
                $34, $35, $36)
            ON CONFLICT (id) DO UPDATE SET
                refunded_amount = EXCLUDED.refunded_amount,
                refund_count = EXCLUDED.refund_count,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at,
                expires_at = EXCLUDED.expires_at,
                initialized_at = EXCLUDED.initialized_at,
                form_showed_at = EXCLUDED.form_showed_at,
                authorizing_at = EXCLUDED.authorizing_at,
                authorized_at = EXCLUDED.authorized_at,
                confirming_at = EXCLUDED.confirming_at,
                confirmed_at = EXCLUDED.confirmed_at,
                cancelling_at = EXCLUDED.cancelling_at,
                cancelled_at = EXCLUDED.cancelled_at,
                reversed_at = EXCLUDED.reversed_at,
                refunding_at = EXCLUDED.refunding_at,
                refunded_at = EXCLUDED.refunded_at,
                rejected_at = EXCLUDED.rejected_at,
                expired_at = EXCLUDED.expired_at,
                authorization_attempts = EXCLUDED.authorization_attempts,
                error_code = EXCLUDED.error_code,
                error_message = EXCLUDED.error_message,
                payment_url = EXCLUDED.payment_url,
                metadata = EXCLUDED.metadata
            "#,
        )
        .bind(payment.id.0)
        .bind(&payment.order_id)
        .bind(payment.team_id.0)
        .bind(&payment.team_slug)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.refunded_amount)
        .bind(payment.refund_count as i32)
        .bind(payment.status.as_str())
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .bind(payment.expires_at)
        .bind(payment.initialized_at)
        .bind(payment.form_showed_at)
        .bind(payment.authorizing_at)
        .bind(payment.authorized_at)
        .bind(payment.confirming_at)
        .bind(payment.confirmed_at)
        .bind(payment.cancelling_at)
        .bind(payment.cancelled_at)
        .bind(payment.reversed_at)
        .bind(payment.refunding_at)
        .bind(payment.refunded_at)
        .bind(payment.rejected_at)
        .bind(payment.expired_at)
        .bind(payment.authorization_attempts as i32)
        .bind(payment.max_allowed_attempts as i32)
        .bind(&payment.error_code)
        .bind(&payment.error_message)
        .bind(&payment.payment_url)
        .bind(&payment.description)
        .bind(&payment.customer_key)
        .bind(&payment.email)
        .bind(metadata)
        .bind(&payment.items)
        .bind(&payment.receipt)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl PaymentStore for PgStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(persistence)?;
        let result = Self::upsert_payment_tx(&mut tx, payment).await;
        match result {
            Ok(()) => tx.commit().await.map_err(persistence),
            Err(err) => {
                let duplicate = err
                    .as_database_error()
                    .and_then(|db| db.constraint())
                    .is_some_and(|c| c == "payments_team_order_key");
                if duplicate {
                    Err(GatewayError::DuplicateOrder {
                        team_slug: payment.team_slug.clone(),
                        order_id: payment.order_id.clone(),
                    })
                } else {
                    Err(persistence(err))
                }
            }
        }
    }

    async fn get_payment(&self, id: &PaymentId) -> Result<Payment> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)?;
        row.ok_or_else(|| GatewayError::not_found("payment", id))?
            .into_payment()
    }

    async fn find_by_order(&self, team_id: &TeamId, order_id: &str) -> Result<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE team_id = $1 AND order_id = $2"
        ))
        .bind(team_id.0)
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)?;
        row.map(PaymentRow::into_payment).transpose()
    }

    async fn update_payment(&self, payment: &Payment) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(persistence)?;
        Self::upsert_payment_tx(&mut tx, payment)
            .await
            .map_err(persistence)?;
        tx.commit().await.map_err(persistence)
    }

    async fn save_transition(&self, payment: &Payment, record: &TransitionRecord) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(persistence)?;
        Self::upsert_payment_tx(&mut tx, payment)
            .await
            .map_err(persistence)?;
        let context = serde_json::to_value(&record.context).unwrap_or(serde_json::Value::Null);
        sqlx::query(
            r#"
            INSERT INTO payment_transitions (id, payment_id, from_status, to_status,
                transitioned_at, user_id, reason, context, is_rollback, rollback_of)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id.0)
        .bind(record.payment_id.0)
        .bind(record.from_status.as_str())
        .bind(record.to_status.as_str())
        .bind(record.transitioned_at)
        .bind(&record.user_id)
        .bind(&record.reason)
        .bind(context)
        .bind(record.is_rollback)
        .bind(record.rollback_of.map(|id| id.0))
        .execute(&mut *tx)
        .await
        .map_err(persistence)?;
        tx.commit().await.map_err(persistence)
    }

    async fn transitions_for(&self, id: &PaymentId) -> Result<Vec<TransitionRecord>> {
        let rows = sqlx::query_as::<_, TransitionRow>(
            "SELECT * FROM payment_transitions WHERE payment_id = $1 ORDER BY transitioned_at ASC",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;
        rows.into_iter().map(TransitionRow::into_record).collect()
    }

    async fn get_transition(
        &self,
        id: &PaymentId,
        transition_id: &TransitionId,
    ) -> Result<Option<TransitionRecord>> {
        let row = sqlx::query_as::<_, TransitionRow>(
            "SELECT * FROM payment_transitions WHERE payment_id = $1 AND id = $2",
        )
        .bind(id.0)
        .bind(transition_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)?;
        row.map(TransitionRow::into_record).transpose()
    }

    async fn append_retry_attempt(&self, attempt: &RetryAttempt) -> Result<()> {
        let metadata = serde_json::to_value(&attempt.metadata).unwrap_or(serde_json::Value::Null);
        sqlx::query(
            r#"
            INSERT INTO payment_retry_attempts (payment_id, attempt_number, attempted_at,
                is_success, error_code, error_message, duration_ms, status_before,
                status_after, policy_name, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(attempt.payment_id.0)
        .bind(attempt.attempt_number as i32)
        .bind(attempt.attempted_at)
        .bind(attempt.is_success)
        .bind(&attempt.error_code)
        .bind(&attempt.error_message)
        .bind(attempt.duration_ms as i64)
        .bind(attempt.status_before.as_str())
        .bind(attempt.status_after.as_str())
        .bind(&attempt.policy_name)
        .bind(metadata)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(())
    }

    async fn retry_attempts_for(&self, id: &PaymentId) -> Result<Vec<RetryAttempt>> {
        let rows = sqlx::query_as::<_, RetryRow>(
            "SELECT * FROM payment_retry_attempts WHERE payment_id = $1 ORDER BY attempt_number ASC",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;
        rows.into_iter().map(RetryRow::into_attempt).collect()
    }

    async fn active_payments(&self, team_id: &TeamId) -> Result<Vec<Payment>> {
        let terminal: Vec<String> = PaymentStatus::all()
            .iter()
            .filter(|s| s.is_terminal())
            .map(|s| s.as_str().to_string())
            .collect();
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE team_id = $1 AND status <> ALL($2)"
        ))
        .bind(team_id.0)
        .bind(&terminal)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;
        rows.into_iter().map(PaymentRow::into_payment).collect()
    }

    async fn payments_expiring_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Payment>> {
        let mut excluded: Vec<String> = PaymentStatus::all()
            .iter()
            .filter(|s| s.is_terminal())
            .map(|s| s.as_str().to_string())
            .collect();
        excluded.push(PaymentStatus::Confirmed.as_str().to_string());
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE expires_at < $1 AND status <> ALL($2)"
        ))
        .bind(cutoff)
        .bind(&excluded)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;
        rows.into_iter().map(PaymentRow::into_payment).collect()
    }

    async fn payments_in_status(&self, statuses: &[PaymentStatus]) -> Result<Vec<Payment>> {
        let names: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE status = ANY($1)"
        ))
        .bind(&names)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;
        rows.into_iter().map(PaymentRow::into_payment).collect()
    }

    async fn daily_total(&self, team_id: &TeamId, day: DateTime<Utc>) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount), 0)::BIGINT AS total
            FROM payments
            WHERE team_id = $1
              AND status IN ('CONFIRMED', 'REFUNDED', 'PARTIAL_REFUNDED')
              AND confirmed_at::date = $2::date
            "#,
        )
        .bind(team_id.0)
        .bind(day)
        .fetch_one(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(row.get::<i64, _>("total"))
    }

    async fn maintain(&self) -> Result<()> {
        sqlx::query("ANALYZE payments")
            .execute(&self.pool)
            .await
            .map_err(persistence)?;
        sqlx::query("ANALYZE payment_transitions")
            .execute(&self.pool)
            .await
            .map_err(persistence)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl TeamStore for PgStore {
    async fn insert_team(&self, team: &Team) -> Result<()> {
        let currencies =
            serde_json::to_value(&team.supported_currencies).unwrap_or(serde_json::Value::Null);
        sqlx::query(
            r#"
            INSERT INTO teams (id, team_slug, display_name, active, password, failed_auth_count,
                locked_until, min_payment_amount, max_payment_amount, daily_payment_limit,
                supported_currencies, webhook_url, retries_enabled, fraud_checks_enabled,
                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(team.id.0)
        .bind(&team.team_slug)
        .bind(&team.display_name)
        .bind(team.active)
        .bind(&team.password)
        .bind(team.failed_auth_count as i32)
        .bind(team.locked_until)
        .bind(team.min_payment_amount)
        .bind(team.max_payment_amount)
        .bind(team.daily_payment_limit)
        .bind(currencies)
        .bind(&team.webhook_url)
        .bind(team.retries_enabled)
        .bind(team.fraud_checks_enabled)
        .bind(team.created_at)
        .bind(team.updated_at)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(())
    }

    async fn get_team(&self, id: &TeamId) -> Result<Team> {
        let row = sqlx::query_as::<_, TeamRow>("SELECT * FROM teams WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence)?;
        row.map(TeamRow::into_team)
            .ok_or_else(|| GatewayError::not_found("team", id))
    }

    async fn get_team_by_slug(&self, team_slug: &str) -> Result<Team> {
        let row = sqlx::query_as::<_, TeamRow>("SELECT * FROM teams WHERE team_slug = $1")
            .bind(team_slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence)?;
        row.map(TeamRow::into_team)
            .ok_or_else(|| GatewayError::not_found("team", team_slug))
    }

    async fn update_team(&self, team: &Team) -> Result<()> {
        let currencies =
            serde_json::to_value(&team.supported_currencies).unwrap_or(serde_json::Value::Null);
        let result = sqlx::query(
            r#"
            UPDATE teams SET active = $2, password = $3, failed_auth_count = $4,
                locked_until = $5, min_payment_amount = $6, max_payment_amount = $7,
                daily_payment_limit = $8, supported_currencies = $9, webhook_url = $10,
                retries_enabled = $11, fraud_checks_enabled = $12, updated_at = $13
            WHERE id = $1
            "#,
        )
        .bind(team.id.0)
        .bind(team.active)
        .bind(&team.password)
        .bind(team.failed_auth_count as i32)
        .bind(team.locked_until)
        .bind(team.min_payment_amount)
        .bind(team.max_payment_amount)
        .bind(team.daily_payment_limit)
        .bind(currencies)
        .bind(&team.webhook_url)
        .bind(team.retries_enabled)
        .bind(team.fraud_checks_enabled)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        if result.rows_affected() == 0 {
            return Err(GatewayError::not_found("team", team.id));
        }
        Ok(())
    }

    async fn list_teams(&self) -> Result<Vec<Team>> {
        let rows = sqlx::query_as::<_, TeamRow>("SELECT * FROM teams ORDER BY team_slug")
            .fetch_all(&self.pool)
            .await
            .map_err(persistence)?;
        Ok(rows.into_iter().map(TeamRow::into_team).collect())
    }
}

#[async_trait::async_trait]
impl CustomerStore for PgStore {
    async fn insert_customer(&self, customer: &Customer) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO customers (id, customer_key, team_id, email, blocked, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT ON CONSTRAINT customers_team_key DO UPDATE SET
                email = EXCLUDED.email, blocked = EXCLUDED.blocked
            "#,
        )
        .bind(customer.id.0)
        .bind(&customer.customer_key)
        .bind(customer.team_id.0)
        .bind(&customer.email)
        .bind(customer.blocked)
        .bind(customer.created_at)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(())
    }

    async fn find_customer(&self, team_id: &TeamId, customer_key: &str) -> Result<Option<Customer>> {
        let row = sqlx::query(
            "SELECT id, customer_key, team_id, email, blocked, created_at \
             FROM customers WHERE team_id = $1 AND customer_key = $2",
        )
        .bind(team_id.0)
        .bind(customer_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(row.map(|r| Customer {
            id: CustomerId::from_uuid(r.get("id")),
            customer_key: r.get("customer_key"),
            team_id: TeamId::from_uuid(r.get("team_id")),
            email: r.get("email"),
            blocked: r.get("blocked"),
            created_at: r.get("created_at"),
        }))
    }
}

#[async_trait::async_trait]
impl RuleStore for PgStore {
    async fn insert_rule(&self, rule: &BusinessRule) -> Result<()> {
        let body = serde_json::to_value(rule).map_err(|e| GatewayError::Persistence {
            message: e.to_string(),
        })?;
        sqlx::query(
            "INSERT INTO business_rules (id, team_id, body) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET team_id = EXCLUDED.team_id, body = EXCLUDED.body",
        )
        .bind(rule.id.0)
        .bind(rule.team_id.map(|t| t.0))
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(())
    }

    async fn update_rule(&self, rule: &BusinessRule) -> Result<()> {
        self.insert_rule(rule).await
    }

    async fn delete_rule(&self, id: &RuleId) -> Result<()> {
        let result = sqlx::query("DELETE FROM business_rules WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;
        if result.rows_affected() == 0 {
            return Err(GatewayError::not_found("business rule", id));
        }
        Ok(())
    }

    async fn get_rule(&self, id: &RuleId) -> Result<BusinessRule> {
        let row = sqlx::query("SELECT body FROM business_rules WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence)?;
        let body: serde_json::Value = row
            .ok_or_else(|| GatewayError::not_found("business rule", id))?
            .get("body");
        serde_json::from_value(body).map_err(|e| GatewayError::Persistence {
            message: e.to_string(),
        })
    }

    async fn rules_for_team(&self, team_id: &TeamId) -> Result<Vec<BusinessRule>> {
        let rows = sqlx::query(
            "SELECT body FROM business_rules WHERE team_id IS NULL OR team_id = $1",
        )
        .bind(team_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;
        rows.into_iter()
            .map(|r| {
                serde_json::from_value(r.get::<serde_json::Value, _>("body")).map_err(|e| {
                    GatewayError::Persistence {
                        message: e.to_string(),
                    }
                })
            })
            .collect()
    }

    async fn list_rules(&self) -> Result<Vec<BusinessRule>> {
        let rows = sqlx::query("SELECT body FROM business_rules")
            .fetch_all(&self.pool)
            .await
            .map_err(persistence)?;
        rows.into_iter()
            .map(|r| {
                serde_json::from_value(r.get::<serde_json::Value, _>("body")).map_err(|e| {
                    GatewayError::Persistence {
                        message: e.to_string(),
                    }
                })
            })
            .collect()
    }
}
