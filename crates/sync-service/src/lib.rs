//! Service host for the data-synchronization core.
//!
//! Wires the sync manager and saga coordinator to a store, owns their
//! lifecycle, and exposes `/health` and `/metrics` over HTTP.

pub mod config;
pub mod routes;
pub mod runtime;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

pub use config::{Config, LogFormat};
pub use routes::health::{HealthProbe, HealthState};
pub use runtime::{ServiceCoordinator, SyncRuntime};

/// Creates the Axum application router.
pub fn create_app(health: Arc<HealthState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .with_state(health)
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http())
}
