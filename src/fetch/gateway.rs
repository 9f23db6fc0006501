// src/fetch/gateway.rs
//! Session lifecycle plus paced navigation to account profile pages.

use metrics::{counter, histogram};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::browser::{Browser, BrowserSession, SessionIdentity};
use super::pool::{PoolPolicy, PoolStats, PooledSession, SessionPool};
use crate::domains::{DomainRegistry, UserAgentPool};
use crate::page::Page;
use crate::rate_limiter::RateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_sessions: usize,
    pub policy: PoolPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Host that profiles live under, e.g. `x.com`.
    pub site: String,
    pub page_timeout: Duration,
    /// Extra pause after a page loads, for late-rendering content.
    pub settle_delay: Duration,
    /// `None` means one fresh session per account attempt.
    pub pool: Option<PoolSettings>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            site: "x.com".to_string(),
            page_timeout: Duration::from_millis(5_000),
            settle_delay: Duration::ZERO,
            pool: None,
        }
    }
}

/// A browsing session scoped to one domain.
pub struct Session {
    domain: String,
    kind: SessionKind,
}

enum SessionKind {
    Fresh(Box<dyn BrowserSession>),
    Pooled(PooledSession),
}

impl Session {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self.kind, SessionKind::Pooled(_))
    }

    fn inner(&mut self) -> &mut dyn BrowserSession {
        match &mut self.kind {
            SessionKind::Fresh(s) => s.as_mut(),
            SessionKind::Pooled(p) => p.session_mut(),
        }
    }
}

pub struct FetchGateway {
    browser: Arc<dyn Browser>,
    limiter: Arc<RateLimiter>,
    registry: DomainRegistry,
    agents: UserAgentPool,
    site: String,
    page_timeout_ms: AtomicU64,
    settle_delay: Duration,
    pool_settings: Option<PoolSettings>,
    pools: Mutex<HashMap<String, Arc<SessionPool>>>,
    started: AtomicBool,
}

impl FetchGateway {
    pub fn new(
        browser: Arc<dyn Browser>,
        limiter: Arc<RateLimiter>,
        registry: DomainRegistry,
        config: GatewayConfig,
    ) -> Self {
        Self {
            browser,
            limiter,
            registry,
            agents: UserAgentPool::default(),
            site: config.site,
            page_timeout_ms: AtomicU64::new(config.page_timeout.as_millis() as u64),
            settle_delay: config.settle_delay,
            pool_settings: config.pool,
            pools: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
        }
    }

    pub fn with_user_agents(mut self, agents: UserAgentPool) -> Self {
        self.agents = agents;
        self
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms.load(Ordering::SeqCst))
    }

    /// Applied from the next navigation on.
    pub fn set_page_timeout(&self, timeout: Duration) {
        self.page_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.browser.launch().await {
            self.started.store(false, Ordering::SeqCst);
            return Err(e);
        }
        tracing::info!(site = %self.site, pooled = self.pool_settings.is_some(), "fetch gateway started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        let pools: Vec<Arc<SessionPool>> = self.pools.lock().drain().map(|(_, p)| p).collect();
        for pool in pools {
            pool.close_all().await;
        }
        self.browser.close().await;
        tracing::info!("fetch gateway stopped");
    }

    /// Fresh identity for `domain`: a rotated user agent plus the domain's
    /// stored cookies, if any.
    pub fn identity_for(&self, domain: &str) -> SessionIdentity {
        SessionIdentity::new(domain, self.agents.pick())
            .with_cookies(self.registry.cookies_for(domain).to_vec())
    }

    /// Open a session for `domain`. Failures are logged and yield `None`.
    pub async fn open(&self, domain: &str) -> Option<Session> {
        let identity = self.identity_for(domain);
        if !identity.is_authenticated() {
            tracing::debug!(domain, "no cookies configured, fetching unauthenticated");
        }

        let kind = match self.pool_settings {
            None => match self.browser.new_session(&identity).await {
                Ok(s) => SessionKind::Fresh(s),
                Err(e) => {
                    tracing::error!(domain, error = %e, "could not open browser session");
                    return None;
                }
            },
            Some(settings) => {
                let pool = self.pool_for(domain, settings);
                match pool.checkout(self.browser.as_ref(), &identity).await {
                    Ok(lease) => SessionKind::Pooled(lease),
                    Err(e) => {
                        tracing::error!(domain, error = %e, "could not check out pooled session");
                        return None;
                    }
                }
            }
        };

        Some(Session {
            domain: domain.to_string(),
            kind,
        })
    }

    fn pool_for(&self, domain: &str, settings: PoolSettings) -> Arc<SessionPool> {
        self.pools
            .lock()
            .entry(domain.to_string())
            .or_insert_with(|| SessionPool::new(domain, settings.max_sessions, settings.policy))
            .clone()
    }

    pub fn pool_stats(&self) -> HashMap<String, PoolStats> {
        self.pools
            .lock()
            .iter()
            .map(|(d, p)| (d.clone(), p.stats()))
            .collect()
    }

    pub fn profile_url(&self, account_id: &str) -> String {
        format!("https://{}/{}", self.site, account_id)
    }

    /// Navigate to the account's profile and return the loaded page.
    ///
    /// The rate limiter's wait is served before navigating and the request
    /// is recorded right after it, whether or not it succeeded. Errors are
    /// logged with the account and turned into `None`.
    pub async fn fetch_account_page(&self, session: &mut Session, account_id: &str) -> Option<Page> {
        let domain = session.domain().to_string();
        let url = self.profile_url(account_id);

        let wait = self.limiter.should_wait(&domain);
        if !wait.is_zero() {
            tracing::debug!(domain = %domain, account = %account_id, wait_ms = wait.as_millis() as u64, "pacing before navigation");
            tokio::time::sleep(wait).await;
        }

        let timeout = self.page_timeout();
        let t0 = tokio::time::Instant::now();
        let result = tokio::time::timeout(timeout, session.inner().navigate(&url, timeout)).await;
        self.limiter.record(&domain);
        counter!("fetch_requests_total").increment(1);
        histogram!("fetch_duration_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let page = match result {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => {
                counter!("fetch_errors_total").increment(1);
                tracing::error!(account = %account_id, url = %url, error = %e, "page fetch failed");
                return None;
            }
            Err(_) => {
                counter!("fetch_errors_total").increment(1);
                tracing::error!(account = %account_id, url = %url, timeout_ms = timeout.as_millis() as u64, "page fetch timed out");
                return None;
            }
        };

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        Some(page)
    }

    /// End of an account attempt: fresh sessions are closed, pooled ones go
    /// back to their pool.
    pub async fn release(&self, session: Session) {
        match session.kind {
            SessionKind::Fresh(mut s) => s.close().await,
            SessionKind::Pooled(lease) => drop(lease),
        }
    }
}
