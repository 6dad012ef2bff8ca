//! Podwatch agent - container state monitor
//!
//! Reconciles every configured Docker host and Kubernetes cluster on a fixed
//! interval and serves health, metrics and the live metric stream.

use agent_lib::{
    health::{components, HealthRegistry},
    observability::StructuredLogger,
    reconcile::SyncOptions,
    store::MemoryStore,
    stream::{PrometheusSource, StaticTokens},
    sync::{DockerHostTarget, KubeClusterTarget, SyncLoopBuilder, SyncTarget},
};
use anyhow::{Context, Result};
use podwatch_agent::{api, config::AgentConfig};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = AgentConfig::load()?;
    let logger = StructuredLogger::new(&config.instance);

    let health_registry = HealthRegistry::new();
    health_registry.register(components::STORE).await;
    health_registry.register(components::STREAM).await;

    let store = match &config.snapshot_path {
        Some(path) => MemoryStore::open(path)
            .with_context(|| format!("Failed to load snapshot {}", path.display()))?,
        None => MemoryStore::new(),
    };
    let store = Arc::new(store);

    let mut targets: Vec<Arc<dyn SyncTarget>> = Vec::new();
    for host in config.active_hosts() {
        targets.push(Arc::new(DockerHostTarget::new(
            &host.name,
            &host.host_url,
            config.connect_timeout(),
        )));
    }
    for cluster in config.active_clusters() {
        targets.push(Arc::new(KubeClusterTarget::new(
            &cluster.name,
            cluster.strategies(),
            config.connect_timeout(),
        )));
    }
    if targets.is_empty() {
        warn!("No active Docker hosts or clusters configured");
    }

    logger.log_startup(
        AGENT_VERSION,
        config.active_hosts().count(),
        config.active_clusters().count(),
    );

    let mut builder = SyncLoopBuilder::new()
        .store(store)
        .health(Arc::new(health_registry.clone()))
        .interval(config.sync_interval())
        .options(SyncOptions {
            skip_metrics: !config.collect_metrics,
            ..Default::default()
        })
        .scan_logs(config.scan_logs, config.log_tail_lines)
        .snapshot_path(config.snapshot_path.clone());
    for target in targets {
        builder = builder.target(target);
    }
    let sync_loop = builder.build()?;

    let source = PrometheusSource::new(&config.prometheus.url, config.query_timeout())
        .context("Failed to build metrics source client")?;
    let tokens = StaticTokens::new(config.tokens.clone());
    if tokens.is_empty() {
        warn!("No stream tokens configured; every stream connection will be rejected");
    }

    let app_state = Arc::new(
        api::AppState::new(
            health_registry,
            Arc::new(source),
            Arc::new(tokens),
            api::StreamSettings {
                default_period_secs: config.stream.default_period_secs,
                query_timeout: config.query_timeout(),
            },
        )
        .with_logger(logger.clone()),
    );
    let stream_shutdown = app_state.shutdown.clone();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let sync_handle = tokio::spawn(sync_loop.run(shutdown_rx));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    // Closes every stream session and stops the server
    stream_shutdown.cancel();
    let _ = shutdown_tx.send(());

    if let Err(e) = sync_handle.await {
        warn!(error = %e, "Sync loop task failed");
    }
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server failed"),
        Err(e) => warn!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
