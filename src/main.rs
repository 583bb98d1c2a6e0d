//! xchain-bridge - validator-attested cross-chain transfer bridge
//!
//! Runs the bridge core with its coordination engine, the status API and the
//! Prometheus metrics endpoint. Chain watchers feed observations through the
//! coordination engine's channel.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use xchain_bridge::api::{self, AppState};
use xchain_bridge::config::{LoggingConfig, Settings};
use xchain_bridge::coordination::CoordinationEngine;
use xchain_bridge::metrics::{self, MetricsServer};
use xchain_bridge::state::{BridgeRepository, InMemoryRepository};
use xchain_bridge::BridgeNode;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::load().context("Failed to load configuration")?;

    // Initialize logging
    init_logging(&settings.logging);

    info!("Starting xchain-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Loaded configuration for {} chains and {} asset mappings",
        settings.bridge.supported_chains.len(),
        settings.asset_mappings.len()
    );

    // Wire the bridge core
    let node = BridgeNode::from_settings(settings.clone()).context("Failed to build bridge core")?;

    let repository: Arc<dyn BridgeRepository> = Arc::new(InMemoryRepository::new());

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };
    metrics::record_bridge_paused(false);

    // Initialize coordination engine
    let coordination_engine = Arc::new(
        CoordinationEngine::new(
            node.orchestrator.clone(),
            node.batches.clone(),
            repository.clone(),
            settings.maintenance.clone(),
        )
        .await
        .context("Failed to initialize coordination engine")?,
    );
    info!("Coordination engine initialized");

    // Chain watchers send observations through this channel
    let (_watcher_tx, watcher_rx) = mpsc::channel(settings.maintenance.watcher_queue.max(1));

    // Start API server
    let api_handle = if settings.api.enabled {
        let state = AppState::new(node.orchestrator.clone(), node.batches.clone(), repository.clone());
        let config = settings.api.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Start coordination engine
    let coordination_handle = tokio::spawn({
        let engine = coordination_engine.clone();
        async move {
            if let Err(e) = engine.run(watcher_rx).await {
                error!("Coordination engine error: {}", e);
            }
        }
    });

    let (total, active) = node.consensus.validator_counts().await;
    if active < settings.bridge.min_validators {
        warn!(
            total,
            active,
            min_validators = settings.bridge.min_validators,
            "Validator set below configured minimum"
        );
    }

    info!("xchain-bridge is running");
    if settings.api.enabled {
        info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    }
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    coordination_engine.stop().await;
    if let Err(e) = coordination_handle.await {
        warn!("Coordination engine task ended abnormally: {}", e);
    }

    // Abort background tasks
    if let Some(h) = api_handle {
        h.abort();
    }
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("xchain-bridge stopped");
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            config
                .filter
                .as_deref()
                .unwrap_or("info,xchain_bridge=debug,hyper=warn,tower_http=info"),
        )
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
}
