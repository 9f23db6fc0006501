// src/monitor.rs
//! The monitoring loop: fetch, extract, compare, notify; then sleep.
//!
//! Accounts are processed one at a time, in configured order. A failing
//! account never aborts the cycle. The first post seen for an account only
//! establishes its baseline; later changes are notified.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::baseline::BaselineStore;
use crate::config::ConfigSource;
use crate::extract::PostExtractor;
use crate::fetch::{Browser, FetchGateway};
use crate::notify::PostNotifier;
use crate::post::{Fingerprint, Post};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Idle,
    Running,
    Processing,
    Sleeping,
    Stopped,
}

/// What happened to one account in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AccountOutcome {
    BaselineEstablished { account: String },
    NoChange { account: String },
    NewPost {
        account: String,
        fingerprint: Fingerprint,
        delivered: bool,
    },
    Error { account: String, reason: String },
}

impl AccountOutcome {
    pub fn account(&self) -> &str {
        match self {
            Self::BaselineEstablished { account }
            | Self::NoChange { account }
            | Self::NewPost { account, .. }
            | Self::Error { account, .. } => account,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl fmt::Display for AccountOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BaselineEstablished { account } => {
                write!(f, "@{account}: first check (baseline established)")
            }
            Self::NoChange { account } => write!(f, "@{account}: no new posts"),
            Self::NewPost {
                account,
                delivered: true,
                ..
            } => write!(f, "@{account}: new post, notification sent"),
            Self::NewPost {
                account,
                delivered: false,
                ..
            } => write!(f, "@{account}: new post, notification failed"),
            Self::Error { account, reason } => write!(f, "@{account}: error: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<AccountOutcome>,
    /// Stop was requested before every account was visited.
    pub interrupted: bool,
}

impl CycleReport {
    pub fn new_posts(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, AccountOutcome::NewPost { .. }))
            .count()
    }

    pub fn errors(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_error()).count()
    }
}

pub struct Monitor {
    gateway: Arc<FetchGateway>,
    extractor: PostExtractor,
    baseline: Arc<BaselineStore>,
    notifier: Arc<dyn PostNotifier>,
    config: Arc<dyn ConfigSource>,
    state: RwLock<MonitorState>,
    running: AtomicBool,
    stop_tx: watch::Sender<bool>,
    last_report: RwLock<Option<CycleReport>>,
}

impl Monitor {
    pub fn new(
        gateway: Arc<FetchGateway>,
        notifier: Arc<dyn PostNotifier>,
        config: Arc<dyn ConfigSource>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            gateway,
            extractor: PostExtractor::new(),
            baseline: Arc::new(BaselineStore::new()),
            notifier,
            config,
            state: RwLock::new(MonitorState::Idle),
            running: AtomicBool::new(false),
            stop_tx,
            last_report: RwLock::new(None),
        }
    }

    /// Wire every collaborator from the source's current snapshot.
    pub fn from_config(config: Arc<dyn ConfigSource>, browser: Arc<dyn Browser>) -> Self {
        let cfg = config.current();
        let registry = cfg.domain_registry();
        let limiter = Arc::new(registry.build_rate_limiter());
        let gateway = FetchGateway::new(browser, limiter, registry, cfg.gateway_config())
            .with_user_agents(cfg.user_agent_pool());
        Self::new(Arc::new(gateway), cfg.build_notifier(), config)
    }

    pub fn with_baseline(mut self, baseline: Arc<BaselineStore>) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn with_extractor(mut self, extractor: PostExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn state(&self) -> MonitorState {
        *self.state.read()
    }

    fn set_state(&self, s: MonitorState) {
        *self.state.write() = s;
    }

    pub fn baseline(&self) -> &Arc<BaselineStore> {
        &self.baseline
    }

    pub fn gateway(&self) -> &Arc<FetchGateway> {
        &self.gateway
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        self.last_report.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn stop_requested(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Run cycles until [`stop`](Self::stop) is called.
    ///
    /// Calling this while already running returns immediately, and so does
    /// calling it after a stop was requested that no loop has consumed yet.
    pub async fn start(&self) -> anyhow::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("monitor already running");
            return Ok(());
        }
        if self.stop_tx.send_replace(false) {
            self.running.store(false, Ordering::SeqCst);
            self.set_state(MonitorState::Stopped);
            tracing::info!("stop requested before start, not starting");
            return Ok(());
        }
        let mut stop_rx = self.stop_tx.subscribe();

        if let Err(e) = self.gateway.start().await {
            self.running.store(false, Ordering::SeqCst);
            self.set_state(MonitorState::Stopped);
            return Err(e);
        }
        self.set_state(MonitorState::Running);
        self.gateway.set_page_timeout(self.config.current().page_timeout());
        tracing::info!(notifier = self.notifier.name(), "monitor started");

        while !self.stop_requested() {
            self.run_cycle().await;
            if self.stop_requested() {
                break;
            }

            let cfg = self.config.refresh();
            self.gateway.set_page_timeout(cfg.page_timeout());
            let interval = cfg.check_interval();

            self.set_state(MonitorState::Sleeping);
            tracing::info!(secs = interval.as_secs(), "waiting before next cycle");
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = wait_for_stop(&mut stop_rx) => {}
            }
            if !self.stop_requested() {
                self.set_state(MonitorState::Running);
            }
        }

        self.gateway.shutdown().await;
        self.stop_tx.send_replace(false);
        self.running.store(false, Ordering::SeqCst);
        self.set_state(MonitorState::Stopped);
        tracing::info!("monitor stopped");
        Ok(())
    }

    /// Request a stop. An in-flight account finishes first; a sleep is cut
    /// short. When the loop is not running the gateway is released here.
    pub async fn stop(&self) {
        self.stop_tx.send_replace(true);
        if !self.is_running() {
            self.gateway.shutdown().await;
            self.set_state(MonitorState::Stopped);
        }
    }

    /// One pass over the configured accounts.
    pub async fn run_cycle(&self) -> CycleReport {
        let accounts = self.config.current().accounts;
        let started_at = Utc::now();
        if accounts.is_empty() {
            tracing::warn!("no accounts configured");
        } else {
            tracing::info!(accounts = %accounts.join(", "), "checking accounts");
        }

        let mut outcomes = Vec::with_capacity(accounts.len());
        let mut interrupted = false;
        for account in &accounts {
            if self.stop_requested() {
                interrupted = true;
                break;
            }
            let outcome = self.process_account(account).await;
            if outcome.is_error() {
                tracing::warn!("{outcome}");
            } else {
                tracing::info!("{outcome}");
            }
            outcomes.push(outcome);
        }
        self.set_state(if self.is_running() {
            MonitorState::Running
        } else {
            MonitorState::Idle
        });

        counter!("monitor_cycles_total").increment(1);
        gauge!("monitor_last_cycle_ts").set(Utc::now().timestamp() as f64);

        let report = CycleReport {
            started_at,
            outcomes,
            interrupted,
        };
        *self.last_report.write() = Some(report.clone());
        report
    }

    /// Fetch, extract and compare one account; notify on change.
    pub async fn process_account(&self, account: &str) -> AccountOutcome {
        self.set_state(MonitorState::Processing);
        counter!("monitor_accounts_processed_total").increment(1);

        let post = match self.fetch_latest(account).await {
            Ok(p) => p,
            Err(reason) => {
                return AccountOutcome::Error {
                    account: account.to_string(),
                    reason,
                }
            }
        };

        if !self.baseline.has_seen(account) {
            self.baseline.record(account, &post);
            counter!("monitor_baselines_total").increment(1);
            return AccountOutcome::BaselineEstablished {
                account: account.to_string(),
            };
        }
        if !self.baseline.is_new(account, &post) {
            return AccountOutcome::NoChange {
                account: account.to_string(),
            };
        }

        self.baseline.record(account, &post);
        counter!("monitor_new_posts_total").increment(1);
        match self.notifier.notify_new_post(&post).await {
            Ok(outcome) => AccountOutcome::NewPost {
                account: account.to_string(),
                fingerprint: post.fingerprint(),
                delivered: outcome.success,
            },
            Err(e) => AccountOutcome::Error {
                account: account.to_string(),
                reason: e.to_string(),
            },
        }
    }

    async fn fetch_latest(&self, account: &str) -> Result<Post, String> {
        let domain = self.gateway.site().to_string();
        let Some(mut session) = self.gateway.open(&domain).await else {
            return Err("browser session not available".to_string());
        };
        let page = self.gateway.fetch_account_page(&mut session, account).await;
        let post = page.and_then(|p| self.extractor.extract_latest(&p, account));
        self.gateway.release(session).await;
        post.ok_or_else(|| "could not fetch latest post".to_string())
    }
}

async fn wait_for_stop(rx: &mut watch::Receiver<bool>) {
    // The sender lives as long as the monitor, so this only ends on stop.
    let _ = rx.wait_for(|stop| *stop).await;
}
