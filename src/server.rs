/// Server setup and initialization
///
/// Wires together all components: storage, registry, provider pair with
/// its circuit breaker, grant resolver, engine, trigger evaluator and
/// scheduler. Exposes the Axum application. Every component is
/// constructed once here and passed by Arc reference; there is no global
/// mutable state.

use anyhow::Result;
use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::{
    api::{create_execution_routes, create_workflow_routes, AppState},
    config::Config,
    provider::{CircuitBreakerConfig, DirectRpcAdapter, OneBalanceAdapter, ProviderManager},
    runtime::{ExecutionEngine, TriggerSchedulerService},
    signing::{DevVault, GrantResolver, SigningVault},
    triggers::{ChainLogChecker, FeedChecker, TriggerEvaluator},
    workflow::{WorkflowRegistry, WorkflowStorage},
};

/// Create the main Axum application with all components wired together
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("🗄️ Connecting to database: {}", config.database.url);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database.url)
        .await?;

    let storage = WorkflowStorage::new(pool);
    storage.init_schema().await?;

    tracing::info!("📊 Initializing workflow registry");
    let registry = Arc::new(WorkflowRegistry::new(storage.clone()));
    registry.init_from_storage().await?;

    tracing::info!("🧭 Initializing provider manager");
    let primary = Arc::new(OneBalanceAdapter::new(
        config.provider.onebalance_api_url.clone(),
        config.provider.onebalance_api_key.clone(),
    ));
    let fallback = Arc::new(DirectRpcAdapter::new(
        config.provider.rpc_urls.clone(),
        config.provider.price_feeds.clone(),
    ));
    let provider = Arc::new(ProviderManager::new(
        primary,
        fallback,
        CircuitBreakerConfig {
            failure_threshold: config.provider.breaker_failure_threshold,
            cooldown: Duration::from_secs(config.provider.breaker_cooldown_secs),
        },
    ));

    tracing::info!("🔑 Initializing grant resolver");
    let vault: Arc<dyn SigningVault> = Arc::new(DevVault::new());
    let grants = Arc::new(GrantResolver::new(storage.clone(), vault));

    tracing::info!("⚙️ Initializing execution engine");
    let engine = Arc::new(ExecutionEngine::new(
        storage.clone(),
        Arc::clone(&provider),
        grants,
    ));

    tracing::info!("⏰ Initializing trigger scheduler");
    let evaluator = Arc::new(TriggerEvaluator::new(
        Arc::clone(&provider),
        FeedChecker::new(),
        ChainLogChecker::new(
            config.provider.explorer_api_url.clone(),
            config.provider.explorer_api_key.clone(),
        ),
    ));
    let scheduler = Arc::new(
        TriggerSchedulerService::new(
            storage.clone(),
            evaluator,
            engine,
            config.scheduler.sweep_schedule.clone(),
            config.scheduler.retry_delay_minutes,
        )
        .await?,
    );

    let scheduler_handle = Arc::clone(&scheduler);
    tokio::spawn(async move {
        if let Err(e) = scheduler_handle.start().await {
            tracing::error!("❌ Failed to start trigger scheduler: {}", e);
        }
    });

    let app_state = AppState {
        storage,
        registry,
        scheduler,
        provider,
    };

    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes())
        .merge(create_execution_routes())
        .with_state(app_state);

    tracing::info!("✅ Application initialized");
    Ok(app)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    tracing::info!("Starting Chainflow server...");
    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Health check: liveness plus provider/breaker summary
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(state.provider.health_summary().await)
}
