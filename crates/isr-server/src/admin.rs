use crate::pipeline::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// State for the admin router (separate port).
#[derive(Clone)]
pub struct AdminState {
    pub app: Arc<AppState>,
    pub prometheus: PrometheusHandle,
    pub start_time: Instant,
}

#[derive(Debug, Serialize)]
pub struct KeysResponse {
    pub count: usize,
    pub keys: Vec<String>,
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/api/keys", get(keys_handler))
        .route("/api/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// GET /api/keys — every cached URL across all domains.
pub async fn keys_handler(State(state): State<AdminState>) -> Json<KeysResponse> {
    let keys = state.app.cache.list_all_keys().await;
    Json(KeysResponse {
        count: keys.len(),
        keys,
    })
}

/// GET /api/stats — one-shot stats endpoint.
pub async fn stats_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let stats = state.app.cache.stats().await;
    let total = stats.hits + stats.misses;
    let hit_rate = if total > 0 {
        stats.hits as f64 / total as f64
    } else {
        0.0
    };

    Json(serde_json::json!({
        "backend": state.app.cache.name(),
        "hit_rate": hit_rate,
        "stats": stats,
        "regenerating": state.app.regenerations_in_flight(),
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    }))
}

/// GET /metrics — Prometheus text format.
pub async fn metrics_handler(State(state): State<AdminState>) -> String {
    state.prometheus.render()
}
