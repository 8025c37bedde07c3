//! Sync service entry point.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use state_store::{
    ConflictStore, EventPublisher, InMemoryPublisher, InMemorySyncStore, PostgresSyncStore,
    ResolvedStateCache, SagaStore, StateStore,
};
use sync_service::{Config, LogFormat, SyncRuntime};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Runs the synchronization core and the HTTP surface until shutdown.
async fn serve<S, P>(
    config: &Config,
    store: S,
    publisher: P,
    backend: &'static str,
    metrics_handle: PrometheusHandle,
) where
    S: StateStore + ConflictStore + ResolvedStateCache + SagaStore + Clone + 'static,
    P: EventPublisher + Clone + 'static,
{
    let runtime = SyncRuntime::new(store, publisher, config);
    runtime.start().await;

    let app = sync_service::create_app(Arc::new(runtime.health_state(backend)), metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, store = backend, "starting sync service");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    runtime.stop().await;
    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the storage backend and serve
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url)
                .await
                .expect("failed to connect to database");
            let store = PostgresSyncStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            serve(&config, store.clone(), store, "postgres", metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage");
            serve(
                &config,
                InMemorySyncStore::new(),
                InMemoryPublisher::new(),
                "memory",
                metrics_handle,
            )
            .await;
        }
    }
}
