// tests/status_api.rs
mod common;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::Value;
use tower::ServiceExt;

use common::{harness, profile_html};
use feed_monitor::api::status_router;
use feed_monitor::{RateLimitConfig, RateLimiter};

async fn get_text(app: axum::Router, path: &str) -> (StatusCode, String) {
    let resp = app
        .oneshot(Request::get(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    // axum::body::to_bytes requires an explicit limit
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn health_is_ok() {
    let h = harness(&[]);
    let (status, text) = get_text(status_router(h.monitor.clone(), None), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "OK");
}

#[tokio::test]
async fn stats_reflect_last_cycle() {
    let h = harness(&["nasa", "ghost"]);
    h.browser.serve("nasa", profile_html("nasa", &[(5, "hello")]));
    h.monitor.run_cycle().await;

    let (status, text) = get_text(status_router(h.monitor.clone(), None), "/stats").await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_str(&text).unwrap();

    assert_eq!(v["state"], "idle");
    assert_eq!(v["tracked_accounts"], serde_json::json!(["nasa"]));
    assert_eq!(v["domains"]["x.com"]["requests_in_last_minute"], 2);
    assert_eq!(v["domains"]["x.com"]["is_rate_limited"], false);

    let outcomes = v["last_cycle"]["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0]["outcome"], "baseline_established");
    assert_eq!(outcomes[1]["outcome"], "error");
    assert_eq!(outcomes[1]["account"], "ghost");
}

#[tokio::test]
async fn metrics_route_only_with_handle() {
    let h = harness(&[]);
    let (status, _) = get_text(status_router(h.monitor.clone(), None), "/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::with_local_recorder(&recorder, || {
        let rl = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 1,
            ..RateLimitConfig::default()
        });
        rl.record("x.com");
        let _ = rl.should_wait("x.com");
    });

    let (status, text) = get_text(status_router(h.monitor.clone(), Some(handle)), "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("rate_limiter_backoff_secs"), "{text}");
    assert!(text.contains(r#"domain="x.com""#), "{text}");
}
