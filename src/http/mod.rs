//! Read-only health and stats endpoints.

use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::counters::{CountersSnapshot, PipelineCounters};
use crate::core::lifecycle::{PipelineState, StateHandle};
use crate::wallets::WalletStore;

pub const SERVICE_NAME: &str = env!("CARGO_PKG_NAME");
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct AppState {
    pub counters: Arc<PipelineCounters>,
    pub state: StateHandle,
    pub store: Arc<WalletStore>,
    pub model_version: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ServiceInfo {
    service: &'static str,
    version: &'static str,
    state: PipelineState,
    model_version: String,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    state: PipelineState,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    state: PipelineState,
    #[serde(flatten)]
    counters: CountersSnapshot,
    wallets_tracked: usize,
    wallets_evicted: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/api/v1/health", get(health))
        .route("/api/v1/stats", get(stats))
        .with_state(state)
}

async fn root(State(app): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: SERVICE_NAME,
        version: SERVICE_VERSION,
        state: app.state.get(),
        model_version: app.model_version.clone(),
        started_at: app.started_at,
    })
}

async fn health(State(app): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let state = app.state.get();
    if state.is_healthy() {
        (StatusCode::OK, Json(HealthResponse { status: "ok", state }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unavailable",
                state,
            }),
        )
    }
}

async fn stats(State(app): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        state: app.state.get(),
        counters: app.counters.snapshot(),
        wallets_tracked: app.store.len(),
        wallets_evicted: app.store.evicted(),
    })
}
