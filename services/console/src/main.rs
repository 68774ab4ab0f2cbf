use anyhow::{Context, Result};
use console_service::api::{start_api_server, AppState};
use console_service::normalizer::NormalizerSettings;
use console_service::partitioner::PrivacySettings;
use console_service::triage::TriageSettings;
use console_service::{
    Config, GalleryService, MetadataStore, Normalizer, OrphanSweeper, PrivacyPartitioner,
    S3ObjectStore, TriageEngine,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Console Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let metadata_store = Arc::new(
        MetadataStore::new(&config.database)
            .await
            .context("Failed to initialize metadata store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        metadata_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let object_store = Arc::new(
        S3ObjectStore::new(&config.object_store)
            .await
            .context("Failed to initialize object store")?,
    );

    let partitioner = PrivacyPartitioner::new(
        object_store.clone(),
        PrivacySettings::new(&config.privacy, config.normalizer.jpeg_quality),
    );
    let gallery = Arc::new(GalleryService::new(
        Normalizer::new(NormalizerSettings::from(&config.normalizer)),
        partitioner,
        metadata_store.clone(),
    ));
    let triage = Arc::new(TriageEngine::new(
        metadata_store.clone(),
        metadata_store.clone(),
        TriageSettings::from(&config.triage),
    ));
    let sweeper = Arc::new(OrphanSweeper::new(
        object_store,
        metadata_store,
        config.reconcile_grace_period(),
    ));

    // Create API state
    let api_state = AppState {
        gallery,
        triage,
        sweeper: sweeper.clone(),
    };

    // Spawn periodic sweep task
    let sweep_handle = config.reconcile.enabled.then(|| {
        let interval = config.reconcile_interval();
        tokio::spawn(run_sweeps(sweeper, interval))
    });

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Console service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down console service");

    // Abort tasks
    if let Some(handle) = sweep_handle {
        handle.abort();
    }
    api_handle.abort();

    info!("Console service stopped");

    Ok(())
}

/// Sweep orphaned blobs on a fixed interval
async fn run_sweeps(sweeper: Arc<OrphanSweeper>, period: Duration) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
    // The first tick completes immediately; skip it so startup is not slowed
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(e) = sweeper.sweep().await {
            error!(error = %e, "Orphan sweep failed");
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
