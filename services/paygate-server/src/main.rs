//! Paygate server
//!
//! Wires the gateway together: stores, lock manager, state machine, rule
//! engine, lifecycle, retry, background workers, and the merchant API.
//! With `DATABASE_URL` set the PostgreSQL backends serve; otherwise the
//! in-memory backends do, which is enough for a single-node sandbox.

mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use paygate_api::{create_router, AppState};
use paygate_audit::{AuditLog, InMemoryAuditLog, PgAuditLog};
use paygate_auth::TokenAuthenticator;
use paygate_lifecycle::{
    AutoApprove, EventQueue, LifecycleConfig, LifecycleDeps, LifecycleService,
};
use paygate_lock::LockManager;
use paygate_machine::StateMachine;
use paygate_retry::{RetryPolicy, RetryProcessor, RetryScheduler, RetryService};
use paygate_rules::RuleEngine;
use paygate_store::{
    CustomerStore, MemoryStore, PaymentStore, PgStore, RuleStore, TeamStore,
};
use paygate_types::{
    BusinessRule, Payment, PaymentStatus, Result as GatewayResult, RuleAction, RuleType,
};
use paygate_workers::{
    HttpWebhookSender, MetricsTask, NoopReconciler, ReconcileTask, WebhookDispatcher,
    WorkerConfig, WorkerDeps, WorkerOrchestrator,
};

use crate::config::ServerConfig;

/// Paygate - merchant payment gateway
#[derive(Parser, Debug)]
#[command(name = "paygate-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "PAYGATE_CONFIG")]
    config: Option<String>,

    /// Host to bind to
    #[arg(long, env = "PAYGATE_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "PAYGATE_PORT")]
    port: Option<u16>,

    /// Log filter (trace, debug, info, warn, error)
    #[arg(long, env = "PAYGATE_LOG", default_value = "info")]
    log: String,
}

struct Backends {
    payments: Arc<dyn PaymentStore>,
    teams: Arc<dyn TeamStore>,
    customers: Arc<dyn CustomerStore>,
    rules: Arc<dyn RuleStore>,
    audit: Arc<dyn AuditLog>,
}

async fn backends(config: &ServerConfig) -> anyhow::Result<Backends> {
    match &config.database_url {
        Some(url) => {
            let store = Arc::new(PgStore::connect(url).await?);
            let audit = Arc::new(PgAuditLog::new(store.pool().clone()));
            info!("using postgres backends");
            Ok(Backends {
                payments: store.clone(),
                teams: store.clone(),
                customers: store.clone(),
                rules: store,
                audit,
            })
        }
        None => {
            let store = Arc::new(MemoryStore::new());
            let audit = Arc::new(InMemoryAuditLog::with_capacity(config.audit.max_history_records));
            warn!("DATABASE_URL not set, using in-memory backends");
            Ok(Backends {
                payments: store.clone(),
                teams: store.clone(),
                customers: store.clone(),
                rules: store,
                audit,
            })
        }
    }
}

/// Retry delegate that re-drives authorization through the lifecycle
struct AuthorizeProcessor {
    lifecycle: Arc<LifecycleService>,
}

#[async_trait::async_trait]
impl RetryProcessor for AuthorizeProcessor {
    async fn process(&self, payment: &Payment) -> GatewayResult<()> {
        self.lifecycle.authorize(&payment.id, None).await.map(|_| ())
    }
}

/// Global guard rails derived from the configured payment limits
async fn seed_global_rules(engine: &RuleEngine, config: &ServerConfig) -> GatewayResult<()> {
    let existing = engine.list_rules().await?;
    let has = |name: &str| existing.iter().any(|r| r.name == name && r.team_id.is_none());

    if !has("global-amount-window") {
        engine
            .create_rule(
                BusinessRule::new(None, "global-amount-window", RuleType::AmountValidation, RuleAction::Deny)
                    .with_param("min_amount", config.payment_limits.global_min_payment_amount)
                    .with_param("max_amount", config.payment_limits.global_max_payment_amount)
                    .with_priority(1),
            )
            .await?;
    }
    if !has("global-daily-limit") {
        engine
            .create_rule(
                BusinessRule::new(None, "global-daily-limit", RuleType::PaymentLimit, RuleAction::Deny)
                    .with_param("daily_limit", config.payment_limits.global_daily_payment_limit)
                    .with_priority(2),
            )
            .await?;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
            sig.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut server_config = ServerConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        server_config.server.host = host;
    }
    if let Some(port) = args.port {
        server_config.server.port = port;
    }

    let backends = backends(&server_config).await?;
    let locks = Arc::new(LockManager::new());
    let queue = EventQueue::new();

    let machine = Arc::new(StateMachine::new(
        backends.payments.clone(),
        backends.teams.clone(),
        locks.clone(),
    ));
    let rules = Arc::new(RuleEngine::new(backends.rules.clone(), backends.audit.clone()));
    seed_global_rules(&rules, &server_config).await?;

    let lifecycle = Arc::new(LifecycleService::new(
        LifecycleDeps {
            store: backends.payments.clone(),
            teams: backends.teams.clone(),
            customers: backends.customers.clone(),
            machine: machine.clone(),
            locks: locks.clone(),
            rules: rules.clone(),
            audit: backends.audit.clone(),
            events: Arc::new(queue.clone()),
            authorizer: Arc::new(AutoApprove),
        },
        LifecycleConfig {
            payment_base_url: server_config.payment_form.base_url.clone(),
        },
    ));

    let retry = Arc::new(RetryService::new(
        backends.payments.clone(),
        locks.clone(),
        backends.audit.clone(),
        Arc::new(AuthorizeProcessor {
            lifecycle: lifecycle.clone(),
        }),
    ));
    let scheduler = Arc::new(RetryScheduler::new(retry.clone()));
    {
        // Failed authorizations with retryable codes feed the scheduled
        // retry queue; the same loop fires whatever has come due.
        let store = backends.payments.clone();
        let scheduler = scheduler.clone();
        let retry = retry.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                if let Ok(failed) = store.payments_in_status(&[PaymentStatus::AuthFail]).await {
                    let dead = retry.dead_letters();
                    for payment in failed {
                        if dead.contains(&payment.id) || scheduler.is_scheduled(&payment.id) {
                            continue;
                        }
                        let policy = RetryPolicy::for_amount(payment.amount);
                        let retryable = payment
                            .error_code
                            .as_deref()
                            .is_some_and(|code| policy.is_retryable(code));
                        if retryable {
                            let due = Utc::now()
                                + chrono::Duration::from_std(policy.delay_for(1))
                                    .unwrap_or_else(|_| chrono::Duration::seconds(1));
                            scheduler.schedule(payment.id, due, &policy);
                        }
                    }
                }
                scheduler.run_due(Utc::now()).await;
            }
        });
    }

    let mut worker_config = WorkerConfig::default();
    worker_config.audit_retention_days = server_config.audit.retention_days;
    let mut workers = WorkerOrchestrator::new(
        WorkerDeps {
            store: backends.payments.clone(),
            lifecycle: lifecycle.clone(),
            audit: backends.audit.clone(),
            locks: locks.clone(),
            reconcile: Arc::new(ReconcileTask::new(
                backends.payments.clone(),
                machine.clone(),
                Arc::new(NoopReconciler),
            )),
            metrics: Arc::new(MetricsTask::new(backends.payments.clone())),
            notifications: Arc::new(WebhookDispatcher::new(
                queue.clone(),
                backends.teams.clone(),
                backends.audit.clone(),
                Arc::new(HttpWebhookSender::new()),
            )),
        },
        worker_config,
    );
    workers.start();

    if server_config.feature_flags.enable_configuration_hot_reload {
        let path = args.config.clone();
        tokio::spawn(async move {
            let mut last = ServerConfig::load(path.as_deref()).ok();
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                match ServerConfig::load(path.as_deref()) {
                    Ok(fresh) => {
                        let changed = last
                            .as_ref()
                            .map(|old| {
                                old.payment_limits.global_max_payment_amount
                                    != fresh.payment_limits.global_max_payment_amount
                                    || old.payment_limits.global_min_payment_amount
                                        != fresh.payment_limits.global_min_payment_amount
                            })
                            .unwrap_or(true);
                        if changed {
                            info!("configuration changed on disk; limits apply on next restart");
                        }
                        last = Some(fresh);
                    }
                    Err(err) => warn!("configuration reload failed: {err}"),
                }
            }
        });
    }

    let state = Arc::new(AppState {
        lifecycle,
        store: backends.payments.clone(),
        teams: backends.teams.clone(),
        auth: Arc::new(TokenAuthenticator::new()),
        rules,
        locks,
        audit: backends.audit.clone(),
    });
    let router = create_router(state);

    let addr: SocketAddr = format!("{}:{}", server_config.server.host, server_config.server.port).parse()?;
    info!(%addr, "paygate listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    workers.shutdown().await;
    info!("paygate stopped");
    Ok(())
}
