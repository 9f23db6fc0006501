// src/domains.rs
//! Per-domain capability bundles: cookies + rate-limit profile, plus the
//! user-agent pool sessions draw their identity from.

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::rate_limiter::{RateLimitConfig, RateLimiter};

pub const DEFAULT_USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/119.0",
];

fn default_path() -> String {
    "/".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_true")]
    pub secure: bool,
    #[serde(default, alias = "http_only")]
    pub http_only: bool,
}

/// Render cookies as a single `Cookie:` header value.
pub fn cookie_header(cookies: &[Cookie]) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Read a JSON cookie array. A missing or malformed file is not an error:
/// the domain is simply fetched unauthenticated.
pub fn load_cookies_file(path: &Path) -> Vec<Cookie> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cookie file not readable");
            return Vec::new();
        }
    };
    match serde_json::from_str::<Vec<Cookie>>(&content) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cookie file is not a JSON cookie list");
            Vec::new()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainProfile {
    pub cookies: Vec<Cookie>,
    pub rate_limit: Option<RateLimitConfig>,
}

/// Lookup table from domain to its profile. Unregistered domains fall back
/// to no cookies and the default rate-limit config.
#[derive(Debug, Clone, Default)]
pub struct DomainRegistry {
    profiles: HashMap<String, DomainProfile>,
    default_rate_limit: RateLimitConfig,
}

impl DomainRegistry {
    pub fn new(default_rate_limit: RateLimitConfig) -> Self {
        Self {
            profiles: HashMap::new(),
            default_rate_limit,
        }
    }

    /// Registry preloaded with the conservative x.com / twitter.com profiles.
    pub fn with_builtin_profiles() -> Self {
        let mut reg = Self::new(RateLimitConfig::default());
        for d in ["x.com", "twitter.com"] {
            reg.register(
                d,
                DomainProfile {
                    cookies: Vec::new(),
                    rate_limit: Some(RateLimitConfig::conservative()),
                },
            );
        }
        reg
    }

    pub fn register(&mut self, domain: impl Into<String>, profile: DomainProfile) {
        self.profiles.insert(domain.into(), profile);
    }

    /// Merge into an existing profile: cookies are replaced when non-empty,
    /// the rate-limit override when present.
    pub fn merge(&mut self, domain: &str, profile: DomainProfile) {
        let entry = self.profiles.entry(domain.to_string()).or_default();
        if !profile.cookies.is_empty() {
            entry.cookies = profile.cookies;
        }
        if profile.rate_limit.is_some() {
            entry.rate_limit = profile.rate_limit;
        }
    }

    pub fn set_default_rate_limit(&mut self, config: RateLimitConfig) {
        self.default_rate_limit = config;
    }

    pub fn cookies_for(&self, domain: &str) -> &[Cookie] {
        self.profiles
            .get(domain)
            .map(|p| p.cookies.as_slice())
            .unwrap_or(&[])
    }

    pub fn rate_limit_for(&self, domain: &str) -> &RateLimitConfig {
        self.profiles
            .get(domain)
            .and_then(|p| p.rate_limit.as_ref())
            .unwrap_or(&self.default_rate_limit)
    }

    pub fn domains(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        v.sort_unstable();
        v
    }

    /// Build a limiter that knows every registered override.
    pub fn build_rate_limiter(&self) -> RateLimiter {
        let mut limiter = RateLimiter::new(self.default_rate_limit.clone());
        for (domain, profile) in &self.profiles {
            if let Some(cfg) = &profile.rate_limit {
                limiter = limiter.with_domain(domain.clone(), cfg.clone());
            }
        }
        limiter
    }
}

#[derive(Debug, Clone)]
pub struct UserAgentPool {
    agents: Vec<String>,
}

impl Default for UserAgentPool {
    fn default() -> Self {
        Self {
            agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl UserAgentPool {
    /// An empty list falls back to the built-in agents.
    pub fn new(agents: Vec<String>) -> Self {
        if agents.is_empty() {
            return Self::default();
        }
        Self { agents }
    }

    pub fn pick(&self) -> &str {
        self.agents
            .choose(&mut rand::rng())
            .map(String::as_str)
            .unwrap_or(DEFAULT_USER_AGENTS[0])
    }

    pub fn agents(&self) -> &[String] {
        &self.agents
    }
}
