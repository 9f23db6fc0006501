// tests/common/mod.rs
// Shared fakes for integration tests: a browser serving scripted profile
// pages and a notifier that records what it was asked to send.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use feed_monitor::config::{AppConfig, StaticConfigSource};
use feed_monitor::domains::DomainRegistry;
use feed_monitor::fetch::{Browser, BrowserSession, FetchGateway, GatewayConfig, SessionIdentity};
use feed_monitor::page::Page;
use feed_monitor::{
    DeliveryOutcome, Monitor, MonitorError, Post, PostNotifier, RateLimitConfig, RateLimiter,
};

/// Profile page with one post per `(status_id, text)` in the given order.
pub fn profile_html(account: &str, posts: &[(u64, &str)]) -> String {
    let mut html = String::from("<html><body><main>");
    for (id, text) in posts {
        html.push_str(&format!(
            r#"<article data-testid="tweet"><div data-testid="tweetText"><span>{text}</span></div><a href="/{account}/status/{id}"><time datetime="2024-06-01T12:00:{:02}.000Z">now</time></a></article>"#,
            id % 60
        ));
    }
    html.push_str("</main></body></html>");
    html
}

#[derive(Default)]
pub struct FakeBrowser {
    pages: Arc<Mutex<HashMap<String, std::result::Result<String, String>>>>,
    pub launches: AtomicUsize,
    pub closes: AtomicUsize,
    pub sessions_opened: AtomicUsize,
    pub navigations: Arc<AtomicUsize>,
}

impl FakeBrowser {
    pub fn serve(&self, account: &str, html: String) {
        self.pages
            .lock()
            .insert(format!("https://x.com/{account}"), Ok(html));
    }

    pub fn fail(&self, account: &str, error: &str) {
        self.pages
            .lock()
            .insert(format!("https://x.com/{account}"), Err(error.to_string()));
    }
}

struct FakeSession {
    pages: Arc<Mutex<HashMap<String, std::result::Result<String, String>>>>,
    navigations: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<Page> {
        self.navigations.fetch_add(1, Ordering::SeqCst);
        match self.pages.lock().get(url) {
            Some(Ok(html)) => Ok(Page::new(url, html.clone())),
            Some(Err(e)) => Err(anyhow!("{e}")),
            None => Err(anyhow!("404 for {url}")),
        }
    }

    async fn close(&mut self) {}
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn launch(&self) -> Result<()> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn new_session(&self, _identity: &SessionIdentity) -> Result<Box<dyn BrowserSession>> {
        self.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            pages: self.pages.clone(),
            navigations: self.navigations.clone(),
        }))
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records every post; answers with a fixed outcome.
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Post>>,
    succeed: bool,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            succeed: true,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            succeed: false,
        })
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl PostNotifier for RecordingNotifier {
    async fn notify_new_post(&self, post: &Post) -> std::result::Result<DeliveryOutcome, MonitorError> {
        if post.permalink().is_none() {
            return Err(MonitorError::MissingPermalink {
                account: post.account_id().to_string(),
            });
        }
        self.sent.lock().push(post.clone());
        let status = if self.succeed { 200 } else { 500 };
        Ok(DeliveryOutcome::from_response(status, serde_json::json!({})))
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

pub fn no_delay() -> RateLimitConfig {
    RateLimitConfig {
        requests_per_minute: 1_000,
        min_delay_secs: 0.0,
        max_delay_secs: 0.0,
        ..RateLimitConfig::default()
    }
}

pub fn config_for(accounts: &[&str]) -> AppConfig {
    AppConfig {
        accounts: accounts.iter().map(|a| a.to_string()).collect(),
        check_interval_secs: Some(30),
        ..AppConfig::default()
    }
}

pub struct Harness {
    pub monitor: Arc<Monitor>,
    pub browser: Arc<FakeBrowser>,
    pub notifier: Arc<RecordingNotifier>,
    pub config: Arc<StaticConfigSource>,
}

/// Every fetch waits exactly `secs` before navigating.
pub fn fixed_delay(secs: f64) -> RateLimitConfig {
    RateLimitConfig {
        min_delay_secs: secs,
        max_delay_secs: secs,
        ..no_delay()
    }
}

pub fn harness_with(accounts: &[&str], notifier: Arc<RecordingNotifier>) -> Harness {
    build_harness(accounts, notifier, no_delay())
}

pub fn paced_harness(accounts: &[&str], pacing: RateLimitConfig) -> Harness {
    build_harness(accounts, RecordingNotifier::new(), pacing)
}

fn build_harness(
    accounts: &[&str],
    notifier: Arc<RecordingNotifier>,
    pacing: RateLimitConfig,
) -> Harness {
    let browser = Arc::new(FakeBrowser::default());
    let config = Arc::new(StaticConfigSource::new(config_for(accounts)));
    let gateway = FetchGateway::new(
        browser.clone(),
        Arc::new(RateLimiter::new(pacing.clone())),
        DomainRegistry::new(pacing),
        GatewayConfig::default(),
    );
    let monitor = Monitor::new(Arc::new(gateway), notifier.clone(), config.clone());
    Harness {
        monitor: Arc::new(monitor),
        browser,
        notifier,
        config,
    }
}

pub fn harness(accounts: &[&str]) -> Harness {
    harness_with(accounts, RecordingNotifier::new())
}
