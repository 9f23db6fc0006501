// src/fetch/browser.rs
//! Page-fetch capability. The gateway only talks to these traits; the
//! shipped implementation is a plain HTTP client with a per-session identity.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, USER_AGENT};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::domains::{cookie_header, Cookie};
use crate::error::MonitorError;
use crate::page::Page;

/// Identity a session presents to one domain.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionIdentity {
    pub domain: String,
    pub user_agent: String,
    pub cookies: Vec<Cookie>,
    pub extra_headers: Vec<(String, String)>,
}

impl SessionIdentity {
    pub fn new(domain: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            user_agent: user_agent.into(),
            cookies: Vec::new(),
            extra_headers: Vec::new(),
        }
    }

    pub fn with_cookies(mut self, cookies: Vec<Cookie>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn is_authenticated(&self) -> bool {
        !self.cookies.is_empty()
    }
}

#[async_trait]
pub trait Browser: Send + Sync {
    /// Acquire process-wide resources. Called once per monitor run.
    async fn launch(&self) -> Result<()>;
    /// New isolated session carrying `identity`.
    async fn new_session(&self, identity: &SessionIdentity) -> Result<Box<dyn BrowserSession>>;
    async fn close(&self);
}

#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Load `url` and return once the page is complete.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<Page>;
    async fn close(&mut self);
}

/// Standard headers sent on every page load.
pub fn standard_headers() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        ),
        ("accept-language", "en-US,en;q=0.9"),
    ]
}

/// reqwest-backed browser. Every session gets its own client so connection
/// state and cookies never cross accounts.
#[derive(Debug, Default)]
pub struct HttpBrowser {
    launched: AtomicBool,
}

impl HttpBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_launched(&self) -> bool {
        self.launched.load(Ordering::SeqCst)
    }

    fn headers_for(identity: &SessionIdentity) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (k, v) in standard_headers() {
            headers.insert(HeaderName::from_static(k), HeaderValue::from_static(v));
        }
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&identity.user_agent).context("user agent header")?,
        );
        if let Some(cookie) = cookie_header(&identity.cookies) {
            let mut value = HeaderValue::from_str(&cookie).context("cookie header")?;
            value.set_sensitive(true);
            headers.insert(COOKIE, value);
        }
        for (k, v) in &identity.extra_headers {
            headers.insert(
                HeaderName::from_bytes(k.as_bytes()).context("extra header name")?,
                HeaderValue::from_str(v).context("extra header value")?,
            );
        }
        Ok(headers)
    }
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn launch(&self) -> Result<()> {
        self.launched.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn new_session(&self, identity: &SessionIdentity) -> Result<Box<dyn BrowserSession>> {
        if !self.is_launched() {
            return Err(MonitorError::BrowserNotStarted.into());
        }
        let client = reqwest::Client::builder()
            .default_headers(Self::headers_for(identity)?)
            .build()
            .context("building session client")?;
        Ok(Box::new(HttpSession {
            client: Some(client),
        }))
    }

    async fn close(&self) {
        self.launched.store(false, Ordering::SeqCst);
    }
}

struct HttpSession {
    client: Option<reqwest::Client>,
}

#[async_trait]
impl BrowserSession for HttpSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<Page> {
        let client = self
            .client
            .as_ref()
            .context("session already closed")?;
        let resp = client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url} non-2xx"))?;
        let status = resp.status().as_u16();
        let html = resp.text().await.context("reading page body")?;
        Ok(Page::with_status(url, html, status))
    }

    async fn close(&mut self) {
        self.client = None;
    }
}
