/// Server setup and initialization
///
/// Wires together all components: database, workflow registry, collaborators,
/// continuation workers, the report job and HTTP routes.

use crate::{
    api::{create_api_routes, AppState},
    config::Config,
    curation, database,
    runtime::reports::ReportService,
    service::{Collaborators, Holdingpen},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Router over an assembled holdingpen; workers are the caller's business
pub fn create_router(holdingpen: Holdingpen) -> Router {
    let state = AppState { holdingpen };

    Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        // Objects, actions, callbacks and diagnostics
        .merge(create_api_routes().with_state(state))
}

/// Create the main Axum application with all routes and background services
///
/// Opens the database, registers the curation workflows, starts the continuation
/// workers and the report job. The report service is returned so it can be
/// stopped on shutdown.
pub async fn create_app(config: Config) -> Result<(Router, Arc<ReportService>)> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    tracing::info!("🗄️ Initializing holdingpen database in {}", config.database.data_dir);
    let pool = database::connect(&config.database.data_dir).await?;

    tracing::info!("📊 Registering curation workflows");
    let registry = curation::registry()
        .map_err(|e| anyhow::anyhow!("Failed to register workflows: {}", e))?;
    tracing::info!("📋 Workflows available: {}", registry.kinds().join(", "));

    tracing::info!("🔌 Connecting external collaborators");
    let collaborators = Collaborators::from_config(&config, &pool)?;

    let holdingpen = Holdingpen::new(pool, registry, collaborators, config.clone());

    tracing::info!("🚀 Starting {} continuation workers", config.scheduler.workers);
    let _workers = holdingpen.scheduler.start();

    tracing::info!("⏰ Initializing report scheduler");
    let reports = Arc::new(
        ReportService::new(
            holdingpen.diagnoser.clone(),
            holdingpen.pending.clone(),
            config.cache.report_schedule.clone(),
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize report scheduler: {}", e))?,
    );

    let reports_clone = Arc::clone(&reports);
    tokio::spawn(async move {
        if let Err(e) = reports_clone.start().await {
            tracing::error!("❌ Failed to start report scheduler: {}", e);
        }
    });

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = create_router(holdingpen);

    tracing::info!("✅ Application initialized successfully");

    Ok((app, reports))
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting holdingpen server...");

    let (app, reports) = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutting down");
    if let Err(e) = reports.stop().await {
        tracing::warn!("⚠️ Failed to stop report scheduler: {}", e);
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("⚠️ Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("⚠️ Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received terminate signal, shutting down"),
    }
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
