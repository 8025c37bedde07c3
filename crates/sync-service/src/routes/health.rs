//! Health check endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

/// A named liveness check for one component.
#[derive(Clone)]
pub struct HealthProbe {
    name: &'static str,
    check: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl HealthProbe {
    pub fn new(name: &'static str, check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            name,
            check: Arc::new(check),
        }
    }
}

/// Shared state of the health endpoint.
pub struct HealthState {
    /// Storage backend name, `memory` or `postgres`.
    pub backend: &'static str,
    pub probes: Vec<HealthProbe>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
    pub components: BTreeMap<&'static str, &'static str>,
}

/// GET /health: 200 when every component is running, 503 otherwise.
pub async fn check(State(state): State<Arc<HealthState>>) -> (StatusCode, Json<HealthResponse>) {
    let components: BTreeMap<_, _> = state
        .probes
        .iter()
        .map(|probe| {
            let status = if (probe.check)() { "running" } else { "stopped" };
            (probe.name, status)
        })
        .collect();
    let healthy = components.values().all(|status| *status == "running");

    let response = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        store: state.backend,
        components,
    };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}
