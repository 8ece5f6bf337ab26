//! Paygate Lock - Named mutual exclusion for payment-mutating operations
//!
//! Every mutation of a payment runs under a named lease. The implementation
//! here is in-process; the contract is written so a distributed store can
//! replace it without changing callers: at most one live owner per resource,
//! owner-scoped release, and leases that expire on their own.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default lease expiry applied when callers do not specify one
pub const DEFAULT_LOCK_EXPIRY: Duration = Duration::from_secs(30);

/// A lease over one named resource
#[derive(Debug, Clone)]
pub struct LockLease {
    pub owner: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Proof of lease ownership, required to release
///
/// Dropping a handle does not release the lease; the lease then falls back
/// to expiry. Callers are expected to release explicitly.
#[derive(Debug)]
pub struct LockHandle {
    pub resource: String,
    pub owner: Uuid,
}

/// Tuning knobs for the acquisition retry loop
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Attempts before giving up, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff: Duration,
    /// Backoff growth factor between attempts
    pub backoff_multiplier: f64,
    /// Ceiling on a single backoff sleep
    pub max_backoff: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(25),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_millis(500),
        }
    }
}

/// In-process lock manager keyed by resource string
pub struct LockManager {
    leases: DashMap<String, LockLease>,
    config: LockConfig,
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_config(LockConfig::default())
    }

    pub fn with_config(config: LockConfig) -> Self {
        Self {
            leases: DashMap::new(),
            config,
        }
    }

    /// Single atomic acquisition attempt
    ///
    /// An expired lease on the resource is replaced in the same step; a live
    /// lease held by someone else yields `None`.
    pub fn try_acquire(&self, resource: &str, ttl: Duration) -> Option<LockHandle> {
        let now = Utc::now();
        let owner = Uuid::new_v4();
        let lease = LockLease {
            owner,
            expires_at: now + ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::seconds(30)),
        };
        match self.leases.entry(resource.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(lease);
            }
            Entry::Occupied(mut slot) => {
                if slot.get().expires_at > now {
                    return None;
                }
                debug!(resource, "replacing expired lock lease");
                slot.insert(lease);
            }
        }
        Some(LockHandle {
            resource: resource.to_string(),
            owner,
        })
    }

    /// Acquire with bounded retries and backoff inside the caller's deadline
    ///
    /// Returns `None` on exhaustion or once the deadline has passed; the
    /// deadline is checked before every backoff sleep, so a cancelled caller
    /// never waits out the whole retry budget.
    pub async fn acquire(
        &self,
        resource: &str,
        ttl: Duration,
        deadline: Option<Instant>,
    ) -> Option<LockHandle> {
        let mut backoff = self.config.initial_backoff;
        for attempt in 0..self.config.max_attempts {
            if let Some(handle) = self.try_acquire(resource, ttl) {
                return Some(handle);
            }
            if attempt + 1 == self.config.max_attempts {
                break;
            }
            if let Some(deadline) = deadline {
                if Instant::now() + backoff >= deadline {
                    warn!(resource, "lock acquisition abandoned at deadline");
                    return None;
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = Duration::from_secs_f64(
                (backoff.as_secs_f64() * self.config.backoff_multiplier)
                    .min(self.config.max_backoff.as_secs_f64()),
            );
        }
        warn!(resource, "lock acquisition exhausted its retry budget");
        None
    }

    /// Owner-scoped release; a stale holder cannot release a newer lease
    pub fn release(&self, handle: LockHandle) {
        self.leases
            .remove_if(&handle.resource, |_, lease| lease.owner == handle.owner);
    }

    /// Remove every lease past its expiry; returns how many were purged
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let before = self.leases.len();
        self.leases.retain(|_, lease| lease.expires_at > now);
        before - self.leases.len()
    }

    /// Snapshot of live leases, for the admin surface
    pub fn active_leases(&self) -> Vec<(String, LockLease)> {
        let now = Utc::now();
        self.leases
            .iter()
            .filter(|entry| entry.value().expires_at > now)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Whether the resource currently has a live lease
    pub fn is_held(&self, resource: &str) -> bool {
        self.leases
            .get(resource)
            .is_some_and(|lease| lease.expires_at > Utc::now())
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn exclusive_while_held() {
        let manager = LockManager::new();
        let handle = manager.try_acquire("payment:1", DEFAULT_LOCK_EXPIRY).unwrap();
        assert!(manager.try_acquire("payment:1", DEFAULT_LOCK_EXPIRY).is_none());
        assert!(manager.is_held("payment:1"));
        manager.release(handle);
        assert!(manager.try_acquire("payment:1", DEFAULT_LOCK_EXPIRY).is_some());
    }

    #[tokio::test]
    async fn expired_lease_is_replaced() {
        let manager = LockManager::new();
        let stale = manager
            .try_acquire("payment:2", Duration::from_millis(10))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let fresh = manager.try_acquire("payment:2", DEFAULT_LOCK_EXPIRY);
        assert!(fresh.is_some());
        // The stale holder must not be able to release the new lease.
        manager.release(stale);
        assert!(manager.is_held("payment:2"));
    }

    #[tokio::test]
    async fn acquire_retries_until_released() {
        let manager = Arc::new(LockManager::with_config(LockConfig {
            max_attempts: 20,
            initial_backoff: Duration::from_millis(5),
            backoff_multiplier: 1.0,
            max_backoff: Duration::from_millis(5),
        }));
        let handle = manager.try_acquire("payment:3", DEFAULT_LOCK_EXPIRY).unwrap();

        let contender = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .acquire("payment:3", DEFAULT_LOCK_EXPIRY, None)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.release(handle);
        let acquired = contender.await.unwrap();
        assert!(acquired.is_some());
    }

    #[tokio::test]
    async fn acquire_honours_deadline() {
        let manager = LockManager::new();
        let _held = manager.try_acquire("payment:4", DEFAULT_LOCK_EXPIRY).unwrap();
        let deadline = Instant::now() + Duration::from_millis(40);
        let result = manager
            .acquire("payment:4", DEFAULT_LOCK_EXPIRY, Some(deadline))
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn sweep_purges_expired() {
        let manager = LockManager::new();
        manager
            .try_acquire("payment:5", Duration::from_millis(5))
            .unwrap();
        manager.try_acquire("payment:6", DEFAULT_LOCK_EXPIRY).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.sweep(), 1);
        assert_eq!(manager.active_leases().len(), 1);
    }

    #[tokio::test]
    async fn single_winner_under_contention() {
        let manager = Arc::new(LockManager::with_config(LockConfig {
            max_attempts: 1,
            ..LockConfig::default()
        }));
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                manager.try_acquire("payment:7", DEFAULT_LOCK_EXPIRY).is_some()
            }));
        }
        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
