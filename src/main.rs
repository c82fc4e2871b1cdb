use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use wallet_backend::api::{self, AppState};
use wallet_backend::cache::{init_cache_pool, shutdown_cache_pool, CacheConfig, RedisCache};
use wallet_backend::config::AppConfig;
use wallet_backend::database::memory::InMemoryStore;
use wallet_backend::database::repository::{ExchangeRateRepository, LedgerStore};
use wallet_backend::database::{init_pool_from_config, run_migrations, PgStore};
use wallet_backend::health::HealthChecker;
use wallet_backend::logging::init_tracing_with;
use wallet_backend::middleware::auth::TokenVerifier;
use wallet_backend::payments::PaymentGateways;
use wallet_backend::services::exchange_rate::{ExchangeRateService, ExchangeRateServiceConfig};
use wallet_backend::services::fee_calculation::FeePolicy;
use wallet_backend::services::kyc::{IdentityProvider, IdentityProviderConfig, KycConfig, KycGate};
use wallet_backend::services::ledger::{LedgerConfig, LedgerService};
use wallet_backend::services::payment_orchestrator::{OrchestratorConfig, PaymentOrchestrator};
use wallet_backend::services::qr_signer::{QrConfig, QrService};
use wallet_backend::services::rate_limiter::{
    InMemoryRateLimiter, RateLimitConfig, RateLimitStore, RedisRateLimiter,
};
use wallet_backend::services::rate_providers::{
    ExternalApiConfig, ExternalApiProvider, FixedRateProvider,
};
use wallet_backend::services::reconciliation::ReconciliationService;
use wallet_backend::services::wallet_lookup::WalletLookupService;
use wallet_backend::services::webhook_processor::WebhookProcessor;
use wallet_backend::workers::rate_refresh::{RateRefreshConfig, RateRefreshWorker};
use wallet_backend::workers::reconciliation_sweep::{
    ReconciliationSweepConfig, ReconciliationSweepWorker,
};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

/// The concrete store behind both trait objects the services take
struct Stores {
    ledger: Arc<dyn LedgerStore>,
    rates: Arc<dyn ExchangeRateRepository>,
    pg_pool: Option<sqlx::PgPool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing_with(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting wallet backend service"
    );
    info!(
        host = %config.server.host,
        port = config.server.port,
        skip_externals = config.skip_externals,
        "Server configuration loaded"
    );

    // ------------------------------------------------------------------------
    // Storage
    // ------------------------------------------------------------------------
    let stores = match &config.database {
        None => {
            info!("⏭️  Using the in-memory store (SKIP_EXTERNALS=true)");
            let store = Arc::new(InMemoryStore::new());
            Stores {
                ledger: store.clone(),
                rates: store,
                pg_pool: None,
            }
        }
        Some(db_config) => {
            info!("📊 Initializing database connection pool...");
            let pool = init_pool_from_config(db_config).await.map_err(|e| {
                error!("❌ Failed to initialize database pool: {}", e);
                e
            })?;
            info!(
                max_connections = pool.options().get_max_connections(),
                "✅ Database connection pool initialized"
            );
            if config.server.run_migrations {
                run_migrations(&pool).await?;
            }
            let store = Arc::new(PgStore::new(pool.clone()));
            Stores {
                ledger: store.clone(),
                rates: store,
                pg_pool: Some(pool),
            }
        }
    };

    let redis_cache = if config.skip_externals {
        info!("⏭️  Skipping Redis initialization (SKIP_EXTERNALS=true)");
        None
    } else {
        info!("🔄 Initializing Redis cache connection pool...");
        let cache_pool = init_cache_pool(CacheConfig::from_app(&config.cache))
            .await
            .map_err(|e| {
                error!("❌ Failed to initialize cache pool: {}", e);
                e
            })?;
        info!(redis_url = %config.cache.redis_url, "✅ Cache connection pool initialized");
        Some(RedisCache::new(cache_pool).with_default_ttl(Duration::from_secs(config.cache.default_ttl)))
    };

    // ------------------------------------------------------------------------
    // Rates
    // ------------------------------------------------------------------------
    let mut rates = ExchangeRateService::new(stores.rates.clone(), ExchangeRateServiceConfig::from_env()?);
    if let Some(cache) = &redis_cache {
        rates = rates.with_cache(cache.clone());
    }
    if !config.skip_externals {
        if let Some(api_config) = ExternalApiConfig::from_env()? {
            info!(api_url = %api_config.api_url, "📈 External rates source configured");
            rates = rates.add_provider(Arc::new(ExternalApiProvider::new(api_config)?));
        }
    }
    let rates = Arc::new(rates.add_provider(Arc::new(FixedRateProvider::from_env()?)));

    // ------------------------------------------------------------------------
    // Services
    // ------------------------------------------------------------------------
    let mut kyc = KycGate::new(stores.ledger.clone(), KycConfig::from_env()?);
    if !config.skip_externals {
        match IdentityProviderConfig::from_env() {
            Ok(provider_config) => {
                kyc = kyc.with_provider(Arc::new(IdentityProvider::new(provider_config)?));
                info!("🪪 Identity provider configured");
            }
            Err(e) => warn!(error = %e, "identity provider not configured, KYC updates disabled"),
        }
    }
    let kyc = Arc::new(kyc);

    let gateways = PaymentGateways::from_env()?;
    info!(providers = ?gateways.list_available_providers(), "💳 Payment gateways ready");

    let reconciler = Arc::new(ReconciliationService::new(stores.ledger.clone()));
    let ledger = Arc::new(LedgerService::new(
        stores.ledger.clone(),
        kyc.clone(),
        rates.clone(),
        FeePolicy::from_env()?,
        LedgerConfig::from_env()?,
    ));
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        stores.ledger.clone(),
        gateways.clone(),
        kyc.clone(),
        reconciler.clone(),
        OrchestratorConfig::from_env()?,
    ));
    let webhooks = Arc::new(WebhookProcessor::new(gateways, reconciler));

    let qr_config = QrConfig::from_env()?;
    qr_config.validate()?;
    let qr = Arc::new(QrService::new(stores.ledger.clone(), qr_config));

    let limit_config = RateLimitConfig::from_env()?;
    limit_config.validate()?;
    let limiter: Arc<dyn RateLimitStore> = match &redis_cache {
        Some(cache) => {
            info!("🚦 Lookup rate limits shared through Redis");
            Arc::new(RedisRateLimiter::new(cache.pool().clone()))
        }
        None => Arc::new(InMemoryRateLimiter::new()),
    };
    let lookup = Arc::new(WalletLookupService::new(
        stores.ledger.clone(),
        limiter,
        limit_config,
    ));

    let mut health = HealthChecker::new().with_rates(rates.clone());
    if let Some(pool) = &stores.pg_pool {
        health = health.with_database(pool.clone());
    }
    if let Some(cache) = &redis_cache {
        health = health.with_cache(cache.clone());
    }

    // ------------------------------------------------------------------------
    // Workers
    // ------------------------------------------------------------------------
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let mut worker_handles: Vec<JoinHandle<()>> = Vec::new();

    let refresh_worker = RateRefreshWorker::new(rates.clone(), RateRefreshConfig::from_env()?);
    worker_handles.push(tokio::spawn(refresh_worker.run(worker_shutdown_rx.clone())));

    let sweep_config = ReconciliationSweepConfig::from_env()?;
    if sweep_config.enabled {
        let sweep = ReconciliationSweepWorker::new(
            stores.ledger.clone(),
            orchestrator.clone(),
            sweep_config,
        );
        worker_handles.push(tokio::spawn(sweep.run(worker_shutdown_rx.clone())));
    } else {
        info!("⏭️  Reconciliation sweep disabled");
    }

    // ------------------------------------------------------------------------
    // HTTP
    // ------------------------------------------------------------------------
    let state = AppState {
        ledger,
        orchestrator,
        webhooks,
        qr,
        lookup,
        kyc,
        rates,
        verifier: Arc::new(TokenVerifier::from_config(&config.auth)),
        health,
    };
    let app = api::router(state);
    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    for handle in worker_handles {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            error!("Timed out waiting for worker shutdown");
        }
    }
    if let Some(cache) = &redis_cache {
        shutdown_cache_pool(cache.pool()).await;
    }

    info!("👋 Server shutdown complete");
    Ok(())
}
