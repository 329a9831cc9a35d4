//! atlas-api server binary

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atlas_api::notifications::{NotificationDispatcher, RetryPolicy};
use atlas_api::store::{PgStore, Store};
use atlas_api::usage::UsageWorker;
use atlas_api::{build_router, ApiConfig, ApiState};

/// How often queued notifications are retried
const DISPATCH_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ApiConfig::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting atlas-api v{} ({})", env!("CARGO_PKG_VERSION"), config.environment);

    let mut pg = None;
    let store = if config.in_memory {
        tracing::warn!("Using in-memory store; data is lost on restart");
        Store::memory().0
    } else {
        let backend = Arc::new(PgStore::connect(&config).await.context("connecting to PostgreSQL")?);
        backend.create_tables().await.context("creating tables")?;
        pg = Some(backend.clone());
        Store::from_backend(backend)
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (usage_tx, usage_rx) = mpsc::channel(config.usage_queue_size);
    let notifications = Arc::new(NotificationDispatcher::new(RetryPolicy::default()));

    let worker = UsageWorker::new(store.tenants.clone(), usage_rx, shutdown_rx.clone());
    let worker_handle = tokio::spawn(worker.run());
    let dispatcher_handle =
        tokio::spawn(notifications.clone().run(DISPATCH_INTERVAL, shutdown_rx.clone()));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.host, config.port))?;

    let state = Arc::new(ApiState::new(config, store, usage_tx, notifications)?);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("Listening on {}", addr);
    tracing::info!("API docs at http://{}/docs", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Shutting down background tasks");
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(worker_handle, dispatcher_handle);

    if let Some(pg) = pg {
        pg.close().await;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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

    tracing::info!("Shutdown signal received");
}
