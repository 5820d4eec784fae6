use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use artifetch_core::{
    load_config, validate_config, DownloadOrchestrator, JobRegistry, Notifier, SnapshotStore,
    SqliteSnapshotStore,
};

use artifetch_server::api::create_router;
use artifetch_server::metrics;
use artifetch_server::state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("ARTIFETCH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Snapshot database: {:?}", config.persistence.path);
    info!(
        "Concurrency limit: {} transfers",
        config.downloads.max_concurrent
    );

    // Snapshot store and registry
    let store: Arc<dyn SnapshotStore> = Arc::new(
        SqliteSnapshotStore::new(&config.persistence.path)
            .context("Failed to open snapshot store")?,
    );
    let registry = Arc::new(JobRegistry::new(store));
    info!("Job registry initialized");

    // Notifier for lifecycle/progress fan-out
    let notifier = Notifier::new(config.notifier.buffer_capacity);
    metrics::spawn_outcome_counter(notifier.clone());

    // Orchestrator with the real backends; recovery runs inside start()
    let orchestrator = Arc::new(
        DownloadOrchestrator::with_default_backends(
            config.downloads.clone(),
            Arc::clone(&registry),
            notifier.clone(),
        )
        .context("Failed to create orchestrator")?,
    );
    orchestrator.start().await;
    info!("Download orchestrator started");

    // Create app state and router
    let app_state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&orchestrator),
        notifier,
    ));
    let app = create_router(app_state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    orchestrator.stop().await;
    info!("Download orchestrator stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
