// src/metrics.rs
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("monitor_cycles_total", "Completed monitoring cycles.");
        describe_counter!(
            "monitor_accounts_processed_total",
            "Account checks attempted across all cycles."
        );
        describe_counter!("monitor_new_posts_total", "New posts detected after a baseline existed.");
        describe_counter!("monitor_baselines_total", "Baselines established on first observation.");
        describe_counter!("fetch_requests_total", "Profile page navigations.");
        describe_counter!("fetch_errors_total", "Navigations that failed or timed out.");
        describe_counter!("notify_attempts_total", "Delivery attempts, retries included.");
        describe_counter!("notify_failures_total", "Notifications that ended unsuccessful.");
        describe_histogram!("fetch_duration_ms", "Profile page navigation time in milliseconds.");
        describe_gauge!("monitor_last_cycle_ts", "Unix ts when the last cycle finished.");
        describe_gauge!(
            "rate_limiter_backoff_secs",
            "Most recent backoff imposed per domain, in seconds."
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Call once per process.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    pub fn from_handle(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
