//! Paygate Workers - Background task orchestration
//!
//! One orchestrator owns every timer. Each task runs as a single
//! sequential loop, so a new tick can never overlap the previous one for
//! the same task; a failing tick marks the task unhealthy and the
//! scheduler keeps going. Shutdown stops the timers first, then joins
//! in-flight tasks within a bounded grace.

pub mod metrics;
pub mod notify;
pub mod reconcile;

pub use metrics::{MetricsTask, PeriodMetrics};
pub use notify::{HttpWebhookSender, WebhookDispatcher, WebhookSender, MAX_DELIVERY_ATTEMPTS};
pub use reconcile::{NoopReconciler, ReconcileTask, Reconciler};

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use paygate_audit::{AuditAction, AuditEntry, AuditLog, DEFAULT_RETENTION_DAYS};
use paygate_lifecycle::LifecycleService;
use paygate_lock::LockManager;
use paygate_store::PaymentStore;
use paygate_types::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Timer periods and retention knobs
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub expiry_sweep: Duration,
    pub reconciliation: Duration,
    pub audit_cleanup: Duration,
    pub metrics_rollup: Duration,
    pub maintenance: Duration,
    pub notifications: Duration,
    pub lock_sweep: Duration,
    pub audit_retention_days: i64,
    pub notification_batch: usize,
    pub shutdown_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            expiry_sweep: Duration::from_secs(60),
            reconciliation: Duration::from_secs(5 * 60),
            audit_cleanup: Duration::from_secs(60 * 60),
            metrics_rollup: Duration::from_secs(15 * 60),
            maintenance: Duration::from_secs(6 * 60 * 60),
            notifications: Duration::from_secs(30),
            lock_sweep: Duration::from_secs(60),
            audit_retention_days: DEFAULT_RETENTION_DAYS,
            notification_batch: 64,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Per-task health record
#[derive(Debug, Clone, Default)]
pub struct TaskHealth {
    pub runs: u64,
    pub failures: u64,
    pub healthy: bool,
    pub last_error: Option<String>,
}

/// Collaborators of the orchestrator
pub struct WorkerDeps {
    pub store: Arc<dyn PaymentStore>,
    pub lifecycle: Arc<LifecycleService>,
    pub audit: Arc<dyn AuditLog>,
    pub locks: Arc<LockManager>,
    pub reconcile: Arc<ReconcileTask>,
    pub metrics: Arc<MetricsTask>,
    pub notifications: Arc<WebhookDispatcher>,
}

/// The background worker orchestrator
pub struct WorkerOrchestrator {
    deps: WorkerDeps,
    config: WorkerConfig,
    health: Arc<DashMap<&'static str, TaskHealth>>,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerOrchestrator {
    pub fn new(deps: WorkerDeps, config: WorkerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            deps,
            config,
            health: Arc::new(DashMap::new()),
            shutdown,
            handles: Vec::new(),
        }
    }

    /// Current health per task
    pub fn health(&self) -> Vec<(&'static str, TaskHealth)> {
        self.health
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Spawn every timer
    pub fn start(&mut self) {
        info!("starting background workers");

        let store = self.deps.store.clone();
        let lifecycle = self.deps.lifecycle.clone();
        self.spawn_periodic("expiry_sweep", self.config.expiry_sweep, move || {
            let store = store.clone();
            let lifecycle = lifecycle.clone();
            async move { expiry_sweep(&store, &lifecycle).await }
        });

        let reconcile = self.deps.reconcile.clone();
        self.spawn_periodic("reconciliation", self.config.reconciliation, move || {
            let reconcile = reconcile.clone();
            async move { reconcile.run_once().await.map(|_| ()) }
        });

        let audit = self.deps.audit.clone();
        let retention = self.config.audit_retention_days;
        self.spawn_periodic("audit_cleanup", self.config.audit_cleanup, move || {
            let audit = audit.clone();
            async move { audit_cleanup(&audit, retention).await }
        });

        let metrics = self.deps.metrics.clone();
        self.spawn_periodic("metrics_rollup", self.config.metrics_rollup, move || {
            let metrics = metrics.clone();
            async move { metrics.run_once().await.map(|_| ()) }
        });

        let store = self.deps.store.clone();
        self.spawn_periodic("maintenance", self.config.maintenance, move || {
            let store = store.clone();
            async move { store.maintain().await }
        });

        let notifications = self.deps.notifications.clone();
        let batch = self.config.notification_batch;
        self.spawn_periodic("notifications", self.config.notifications, move || {
            let notifications = notifications.clone();
            async move { notifications.dispatch_pending(batch).await.map(|_| ()) }
        });

        let locks = self.deps.locks.clone();
        self.spawn_periodic("lock_sweep", self.config.lock_sweep, move || {
            let locks = locks.clone();
            async move {
                locks.sweep();
                Ok(())
            }
        });
    }

    fn spawn_periodic<F, Fut>(&mut self, name: &'static str, period: Duration, mut task: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send,
    {
        self.health.insert(
            name,
            TaskHealth {
                healthy: true,
                ..TaskHealth::default()
            },
        );
        let health = self.health.clone();
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup is quiet.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let outcome = task().await;
                        if let Some(mut entry) = health.get_mut(name) {
                            entry.runs += 1;
                            match outcome {
                                Ok(()) => {
                                    entry.healthy = true;
                                    entry.last_error = None;
                                }
                                Err(err) => {
                                    error!(task = name, "background task failed: {err}");
                                    entry.failures += 1;
                                    entry.healthy = false;
                                    entry.last_error = Some(err.to_string());
                                }
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        info!(task = name, "background task stopping");
                        break;
                    }
                }
            }
        });
        self.handles.push(handle);
    }

    /// Stop the timers and join in-flight tasks within the grace window
    pub async fn shutdown(&mut self) {
        info!("stopping background workers");
        let _ = self.shutdown.send(true);
        let grace = self.config.shutdown_grace;
        for handle in self.handles.drain(..) {
            if tokio::time::timeout(grace, handle).await.is_err() {
                warn!("background task did not stop within the grace window");
            }
        }
    }
}

/// Terminate every overdue payment
async fn expiry_sweep(store: &Arc<dyn PaymentStore>, lifecycle: &Arc<LifecycleService>) -> Result<()> {
    let due = store.payments_expiring_before(Utc::now()).await?;
    for payment in due {
        // One stubborn payment must not stall the sweep.
        if let Err(err) = lifecycle.expire(&payment.id).await {
            warn!(payment = %payment.payment_ref(), "expiry failed: {err}");
        }
    }
    Ok(())
}

/// Archive audit rows past retention
async fn audit_cleanup(audit: &Arc<dyn AuditLog>, retention_days: i64) -> Result<()> {
    let cutoff = Utc::now() - ChronoDuration::days(retention_days);
    let archived = audit.archive_older_than(cutoff).await?;
    if archived > 0 {
        info!(archived, "audit retention sweep");
        audit
            .append(
                AuditEntry::new(AuditAction::AuditArchived { count: archived }, "audit_log", "system")
                    .with_details(format!("archived {archived} rows older than {retention_days} days"))
                    .seal(),
            )
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use paygate_audit::InMemoryAuditLog;
    use paygate_lifecycle::{
        AutoApprove, EventQueue, LifecycleConfig, LifecycleDeps, LifecycleService,
    };
    use paygate_machine::StateMachine;
    use paygate_rules::RuleEngine;
    use paygate_store::{MemoryStore, TeamStore};
    use paygate_types::{NewPayment, Payment, PaymentStatus, Team};
    use std::collections::HashMap;

    struct World {
        store: Arc<MemoryStore>,
        audit: Arc<InMemoryAuditLog>,
        lifecycle: Arc<LifecycleService>,
        locks: Arc<LockManager>,
        machine: Arc<StateMachine>,
        queue: EventQueue,
        team: Team,
    }

    async fn world() -> World {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let locks = Arc::new(LockManager::new());
        let queue = EventQueue::new();
        let team = Team::new("acme", "Acme", "secret");
        store.insert_team(&team).await.unwrap();
        let machine = Arc::new(StateMachine::new(store.clone(), store.clone(), locks.clone()));
        let rules = Arc::new(RuleEngine::new(store.clone(), audit.clone()));
        let lifecycle = Arc::new(LifecycleService::new(
            LifecycleDeps {
                store: store.clone(),
                teams: store.clone(),
                customers: store.clone(),
                machine: machine.clone(),
                locks: locks.clone(),
                rules,
                audit: audit.clone(),
                events: Arc::new(queue.clone()),
                authorizer: Arc::new(AutoApprove),
            },
            LifecycleConfig::default(),
        ));
        World {
            store,
            audit,
            lifecycle,
            locks,
            machine,
            queue,
            team,
        }
    }

    fn orchestrator(w: &World, config: WorkerConfig) -> WorkerOrchestrator {
        let reconcile = Arc::new(ReconcileTask::new(
            w.store.clone(),
            w.machine.clone(),
            Arc::new(NoopReconciler),
        ));
        let metrics = Arc::new(MetricsTask::new(w.store.clone()));
        let notifications = Arc::new(WebhookDispatcher::new(
            w.queue.clone(),
            w.store.clone(),
            w.audit.clone(),
            Arc::new(DropSender),
        ));
        WorkerOrchestrator::new(
            WorkerDeps {
                store: w.store.clone(),
                lifecycle: w.lifecycle.clone(),
                audit: w.audit.clone(),
                locks: w.locks.clone(),
                reconcile,
                metrics,
                notifications,
            },
            config,
        )
    }

    struct DropSender;

    #[async_trait::async_trait]
    impl WebhookSender for DropSender {
        async fn send(&self, _url: &str, _payload: &serde_json::Value) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn expiry_sweep_terminates_overdue_payments() {
        let w = world().await;
        let payment = w
            .lifecycle
            .initialize(NewPayment {
                order_id: "O-1".into(),
                team_id: w.team.id,
                team_slug: "acme".into(),
                amount: 100,
                currency: "RUB".into(),
                expiry_minutes: Some(30),
                description: None,
                customer_key: None,
                email: None,
                metadata: HashMap::new(),
                items: None,
                receipt: None,
            })
            .await
            .unwrap();
        let mut overdue = w.store.get_payment(&payment.id).await.unwrap();
        overdue.expires_at = Utc::now() - ChronoDuration::minutes(1);
        w.store.update_payment(&overdue).await.unwrap();

        expiry_sweep(&(w.store.clone() as Arc<dyn PaymentStore>), &w.lifecycle)
            .await
            .unwrap();
        assert_eq!(
            w.store.get_payment(&payment.id).await.unwrap().status,
            PaymentStatus::Expired
        );

        // Idempotent on the next sweep.
        expiry_sweep(&(w.store.clone() as Arc<dyn PaymentStore>), &w.lifecycle)
            .await
            .unwrap();
        assert_eq!(w.store.transitions_for(&payment.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn audit_cleanup_archives_and_records() {
        let w = world().await;
        let mut old = AuditEntry::new(AuditAction::PaymentInitialized, "pay_old", "payment");
        old.timestamp = Utc::now() - ChronoDuration::days(120);
        w.audit.append(old.seal()).await.unwrap();

        audit_cleanup(&(w.audit.clone() as Arc<dyn AuditLog>), DEFAULT_RETENTION_DAYS)
            .await
            .unwrap();
        let archived = w
            .audit
            .query(&paygate_audit::AuditQuery {
                is_archived: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(archived.len(), 1);
    }

    #[tokio::test]
    async fn orchestrator_runs_and_shuts_down_cleanly() {
        let w = world().await;
        let mut config = WorkerConfig::default();
        config.lock_sweep = Duration::from_millis(10);
        config.notifications = Duration::from_millis(10);
        config.expiry_sweep = Duration::from_millis(10);
        config.shutdown_grace = Duration::from_secs(1);

        let mut orchestrator = orchestrator(&w, config);
        orchestrator.start();
        tokio::time::sleep(Duration::from_millis(60)).await;
        orchestrator.shutdown().await;

        let health = orchestrator.health();
        assert_eq!(health.len(), 7);
        let lock_sweep = health.iter().find(|(name, _)| *name == "lock_sweep").unwrap();
        assert!(lock_sweep.1.runs > 0);
        assert!(lock_sweep.1.healthy);
    }

    #[tokio::test]
    async fn failing_task_marks_unhealthy_but_keeps_running() {
        let w = world().await;
        let mut orchestrator = orchestrator(&w, WorkerConfig::default());
        // Drive a failing task directly through the spawn helper.
        orchestrator.spawn_periodic("flaky", Duration::from_millis(5), || async {
            Err(paygate_types::GatewayError::transient("boom"))
        });
        tokio::time::sleep(Duration::from_millis(40)).await;
        orchestrator.shutdown().await;

        let health = orchestrator.health();
        let flaky = health.iter().find(|(name, _)| *name == "flaky").unwrap();
        assert!(!flaky.1.healthy);
        assert!(flaky.1.failures > 1);
        assert_eq!(flaky.1.runs, flaky.1.failures);
    }
}
