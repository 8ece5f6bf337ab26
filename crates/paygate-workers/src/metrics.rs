//! Periodic metric rollups

use chrono::{DateTime, Utc};
use paygate_store::PaymentStore;
use paygate_types::{PaymentStatus, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Aggregated counters for one rollup period
#[derive(Debug, Clone, Serialize)]
pub struct PeriodMetrics {
    pub rolled_up_at: DateTime<Utc>,
    pub counts_by_status: HashMap<String, usize>,
    pub active_volume: i64,
}

/// The metrics rollup worker body
pub struct MetricsTask {
    store: Arc<dyn PaymentStore>,
    periods: RwLock<Vec<PeriodMetrics>>,
    max_periods: usize,
}

impl MetricsTask {
    pub fn new(store: Arc<dyn PaymentStore>) -> Self {
        Self {
            store,
            periods: RwLock::new(Vec::new()),
            max_periods: 96,
        }
    }

    /// One rollup pass
    pub async fn run_once(&self) -> Result<PeriodMetrics> {
        let open_statuses: Vec<PaymentStatus> = PaymentStatus::all()
            .iter()
            .filter(|s| !s.is_terminal())
            .copied()
            .collect();
        let open = self.store.payments_in_status(&open_statuses).await?;

        let mut counts_by_status: HashMap<String, usize> = HashMap::new();
        let mut active_volume = 0;
        for payment in &open {
            *counts_by_status
                .entry(payment.status.as_str().to_string())
                .or_default() += 1;
            active_volume += payment.amount;
        }

        let metrics = PeriodMetrics {
            rolled_up_at: Utc::now(),
            counts_by_status,
            active_volume,
        };
        debug!(open = open.len(), volume = active_volume, "metrics rolled up");

        let mut periods = self.periods.write().await;
        if periods.len() >= self.max_periods {
            periods.remove(0);
        }
        periods.push(metrics.clone());
        Ok(metrics)
    }

    pub async fn recent(&self) -> Vec<PeriodMetrics> {
        self.periods.read().await.clone()
    }
}
