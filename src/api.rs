// src/api.rs
//! Read-only status surface: health, monitor stats, Prometheus metrics.

use axum::{extract::State, routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::fetch::PoolStats;
use crate::metrics::Metrics;
use crate::monitor::{CycleReport, Monitor, MonitorState};
use crate::rate_limiter::RateLimitStats;

#[derive(Clone)]
pub struct StatusState {
    pub monitor: Arc<Monitor>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub state: MonitorState,
    pub tracked_accounts: Vec<String>,
    pub domains: BTreeMap<String, RateLimitStats>,
    pub pools: HashMap<String, PoolStats>,
    pub last_cycle: Option<CycleReport>,
}

/// `/health` and `/stats`, plus `/metrics` when a Prometheus handle is given.
pub fn status_router(monitor: Arc<Monitor>, metrics: Option<PrometheusHandle>) -> Router {
    let router = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/stats", get(stats))
        .with_state(StatusState { monitor });

    match metrics {
        Some(handle) => router.merge(Metrics::from_handle(handle).router()),
        None => router,
    }
}

async fn stats(State(state): State<StatusState>) -> Json<StatsResponse> {
    let m = &state.monitor;
    let limiter = m.gateway().limiter();
    let domains = limiter
        .known_domains()
        .into_iter()
        .map(|d| {
            let s = limiter.stats(&d);
            (d, s)
        })
        .collect();

    Json(StatsResponse {
        state: m.state(),
        tracked_accounts: m.baseline().tracked_accounts(),
        domains,
        pools: m.gateway().pool_stats(),
        last_cycle: m.last_report(),
    })
}
