//! Feed monitor binary: loads config, starts the monitoring loop and the
//! optional status server, and stops cleanly on Ctrl-C.

use anyhow::Context;
use std::sync::Arc;

use feed_monitor::config::{ConfigSource, FileConfigSource};
use feed_monitor::logging::{init_tracing, LogFormat};
use feed_monitor::metrics::Metrics;
use feed_monitor::{api, HttpBrowser, Monitor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let source = Arc::new(FileConfigSource::open_default().context("loading monitor config")?);
    let cfg = source.current();
    init_tracing(
        LogFormat::resolve(cfg.log_format.as_deref()),
        cfg.log_level.as_deref(),
    );
    tracing::info!(
        config = ?source.path(),
        environment = ?cfg.environment,
        accounts = cfg.accounts.len(),
        interval_secs = cfg.check_interval().as_secs(),
        page_timeout_ms = cfg.page_timeout_ms,
        "feed monitor starting"
    );

    let monitor = Arc::new(Monitor::from_config(source.clone(), Arc::new(HttpBrowser::new())));

    if let Some(addr) = cfg.status_addr.clone() {
        let metrics = match Metrics::init() {
            Ok(m) => Some(m.handle),
            Err(e) => {
                tracing::warn!(error = ?e, "metrics recorder unavailable");
                None
            }
        };
        let router = api::status_router(monitor.clone(), metrics);
        let listener = tokio::net::TcpListener::bind(addr.as_str())
            .await
            .with_context(|| format!("binding status server on {addr}"))?;
        tracing::info!(%addr, "status server listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = ?e, "status server stopped");
            }
        });
    }

    let stopper = monitor.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            stopper.stop().await;
        }
    });

    monitor.start().await
}
