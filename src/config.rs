// src/config.rs
//! Runtime configuration: file (TOML or JSON) + environment overrides.
//!
//! Lookup order for the file:
//! 1) $MONITOR_CONFIG_PATH (must exist)
//! 2) config/monitor.toml
//! 3) config/monitor.json
//! 4) built-in defaults

use anyhow::{anyhow, Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use std::{env, fs};

use crate::domains::{load_cookies_file, Cookie, DomainProfile, DomainRegistry, UserAgentPool};
use crate::fetch::{GatewayConfig, PoolPolicy, PoolSettings};
use crate::notify::{DeliveryNotifier, LogNotifier, PostNotifier};
use crate::rate_limiter::RateLimitConfig;

pub const ENV_CONFIG_PATH: &str = "MONITOR_CONFIG_PATH";
pub const ENV_ENVIRONMENT: &str = "ENVIRONMENT";
pub const ENV_NOTIFIER_ENDPOINT: &str = "NOTIFIER_ENDPOINT";
pub const ENV_NOTIFIER_API_KEY: &str = "NOTIFIER_API_KEY";

fn default_interval_dev() -> u64 {
    30
}
fn default_interval_prod() -> u64 {
    60
}
fn default_page_timeout_ms() -> u64 {
    5_000
}
fn default_site() -> String {
    "x.com".to_string()
}
fn default_notifier_timeout() -> u64 {
    30
}
fn default_max_sessions() -> usize {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Prod,
}

impl Environment {
    /// `ENVIRONMENT` = dev|prod. Anything else falls back to dev.
    pub fn from_env() -> Self {
        match env::var(ENV_ENVIRONMENT) {
            Ok(v) => Self::parse(&v).unwrap_or_else(|| {
                tracing::warn!(value = %v, "unknown ENVIRONMENT, using dev");
                Self::Dev
            }),
            Err(_) => Self::Dev,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Some(Self::Dev),
            "prod" | "production" => Some(Self::Prod),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    /// "ENV" means: read from NOTIFIER_API_KEY
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_notifier_timeout")]
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            timeout_secs: default_notifier_timeout(),
        }
    }
}

impl NotifierConfig {
    fn non_empty(v: &Option<String>) -> Option<&str> {
        v.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn is_enabled(&self) -> bool {
        Self::non_empty(&self.endpoint).is_some() && Self::non_empty(&self.api_key).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Wait this long for a free session; unset means fail fast.
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_sessions: default_max_sessions(),
            wait_ms: None,
        }
    }
}

impl PoolConfig {
    pub fn settings(&self) -> Option<PoolSettings> {
        if !self.enabled {
            return None;
        }
        let policy = match self.wait_ms {
            Some(ms) => PoolPolicy::Wait(Duration::from_millis(ms)),
            None => PoolPolicy::FailFast,
        };
        Some(PoolSettings {
            max_sessions: self.max_sessions.max(1),
            policy,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainConfig {
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub accounts: Vec<String>,
    /// Overrides the per-environment interval when set.
    #[serde(default)]
    pub check_interval_secs: Option<u64>,
    #[serde(default = "default_interval_dev")]
    pub check_interval_dev_secs: u64,
    #[serde(default = "default_interval_prod")]
    pub check_interval_prod_secs: u64,
    #[serde(default = "default_page_timeout_ms")]
    pub page_timeout_ms: u64,
    #[serde(default)]
    pub settle_delay_ms: u64,
    #[serde(default = "default_site")]
    pub site: String,
    #[serde(default)]
    pub status_addr: Option<String>,
    #[serde(default)]
    pub log_format: Option<String>,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub user_agents: Vec<String>,
    /// Default pacing for domains without their own profile.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub domains: BTreeMap<String, DomainConfig>,
    #[serde(skip)]
    pub environment: Environment,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            check_interval_secs: None,
            check_interval_dev_secs: default_interval_dev(),
            check_interval_prod_secs: default_interval_prod(),
            page_timeout_ms: default_page_timeout_ms(),
            settle_delay_ms: 0,
            site: default_site(),
            status_addr: None,
            log_format: None,
            log_level: None,
            user_agents: Vec::new(),
            rate_limit: None,
            notifier: NotifierConfig::default(),
            pool: PoolConfig::default(),
            domains: BTreeMap::new(),
            environment: Environment::Dev,
        }
    }
}

impl AppConfig {
    /// Parse TOML or JSON. `hint_ext` picks which is tried first.
    pub fn parse(s: &str, hint_ext: &str) -> Result<Self> {
        let try_toml_first = hint_ext != "json";
        if try_toml_first {
            if let Ok(cfg) = toml::from_str::<AppConfig>(s) {
                return Ok(cfg);
            }
        }
        if let Ok(cfg) = serde_json::from_str::<AppConfig>(s) {
            return Ok(cfg);
        }
        if !try_toml_first {
            if let Ok(cfg) = toml::from_str::<AppConfig>(s) {
                return Ok(cfg);
            }
        }
        // Re-run the primary parser to surface a useful message.
        match hint_ext {
            "json" => serde_json::from_str::<AppConfig>(s)
                .map_err(|e| anyhow!("unsupported config format: {e}")),
            _ => toml::from_str::<AppConfig>(s).map_err(|e| anyhow!("unsupported config format: {e}")),
        }
    }

    /// Load from an explicit path, then apply env overrides and sanitize.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        Ok(Self::parse(&content, &ext)?.finalize())
    }

    /// Load using the env var + fallbacks; no file means defaults.
    pub fn load_default() -> Result<Self> {
        match default_path()? {
            Some(p) => Self::load_from(&p),
            None => Ok(Self::default().finalize()),
        }
    }

    /// Apply env overrides and clamp invalid values.
    pub fn finalize(mut self) -> Self {
        self.environment = Environment::from_env();
        self.accounts = clean_accounts(std::mem::take(&mut self.accounts));

        if self.check_interval_secs == Some(0) {
            self.check_interval_secs = None;
        }
        if self.check_interval_dev_secs == 0 {
            self.check_interval_dev_secs = default_interval_dev();
        }
        if self.check_interval_prod_secs == 0 {
            self.check_interval_prod_secs = default_interval_prod();
        }
        if self.page_timeout_ms == 0 {
            self.page_timeout_ms = default_page_timeout_ms();
        }
        if self.site.trim().is_empty() {
            self.site = default_site();
        }

        if let Ok(ep) = env::var(ENV_NOTIFIER_ENDPOINT) {
            if !ep.trim().is_empty() {
                self.notifier.endpoint = Some(ep);
            }
        }
        let key_from_env = match self.notifier.api_key.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(k) => k.eq_ignore_ascii_case("env"),
        };
        if key_from_env {
            self.notifier.api_key = env::var(ENV_NOTIFIER_API_KEY)
                .ok()
                .filter(|k| !k.trim().is_empty());
        }

        self.rate_limit = self.rate_limit.take().map(RateLimitConfig::sanitized);
        for d in self.domains.values_mut() {
            d.rate_limit = d.rate_limit.take().map(RateLimitConfig::sanitized);
        }
        self
    }

    pub fn check_interval(&self) -> Duration {
        let secs = self.check_interval_secs.unwrap_or(match self.environment {
            Environment::Dev => self.check_interval_dev_secs,
            Environment::Prod => self.check_interval_prod_secs,
        });
        Duration::from_secs(secs)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            site: self.site.clone(),
            page_timeout: self.page_timeout(),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            pool: self.pool.settings(),
        }
    }

    /// Built-in profiles, then the configured default and per-domain overrides.
    pub fn domain_registry(&self) -> DomainRegistry {
        let mut reg = DomainRegistry::with_builtin_profiles();
        if let Some(rl) = &self.rate_limit {
            reg.set_default_rate_limit(rl.clone());
        }
        for (name, d) in &self.domains {
            let mut cookies = d.cookies.clone();
            if cookies.is_empty() {
                if let Some(path) = &d.cookies_file {
                    cookies = load_cookies_file(path);
                }
            }
            reg.merge(
                name,
                DomainProfile {
                    cookies,
                    rate_limit: d.rate_limit.clone(),
                },
            );
        }
        reg
    }

    pub fn user_agent_pool(&self) -> UserAgentPool {
        UserAgentPool::new(self.user_agents.clone())
    }

    /// Delivery notifier when endpoint and key are both set, else the log.
    pub fn build_notifier(&self) -> Arc<dyn PostNotifier> {
        let n = &self.notifier;
        match (
            NotifierConfig::non_empty(&n.endpoint),
            NotifierConfig::non_empty(&n.api_key),
        ) {
            (Some(endpoint), Some(key)) => Arc::new(DeliveryNotifier::http(
                endpoint.to_string(),
                key.to_string(),
                Duration::from_secs(n.timeout_secs.max(1)),
            )),
            _ => {
                tracing::info!("notifier endpoint or api key missing, new posts go to the log only");
                Arc::new(LogNotifier)
            }
        }
    }
}

fn default_path() -> Result<Option<PathBuf>> {
    if let Ok(p) = env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Ok(Some(pb));
        }
        return Err(anyhow!("MONITOR_CONFIG_PATH points to non-existent path"));
    }
    for candidate in ["config/monitor.toml", "config/monitor.json"] {
        let pb = PathBuf::from(candidate);
        if pb.exists() {
            return Ok(Some(pb));
        }
    }
    Ok(None)
}

/// Trim, drop empties, de-duplicate keeping first occurrence order.
fn clean_accounts(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

/// Supplies the configuration snapshot used for each cycle.
pub trait ConfigSource: Send + Sync {
    fn current(&self) -> AppConfig;

    /// Re-read the backing store. Failures keep the previous snapshot.
    fn refresh(&self) -> AppConfig {
        self.current()
    }
}

/// File-backed source; re-reads the file on each refresh.
#[derive(Debug)]
pub struct FileConfigSource {
    path: Option<PathBuf>,
    snapshot: RwLock<AppConfig>,
}

impl FileConfigSource {
    /// Resolve the file via the lookup order and load it once.
    pub fn open_default() -> Result<Self> {
        let path = default_path()?;
        let snapshot = match &path {
            Some(p) => AppConfig::load_from(p)?,
            None => AppConfig::default().finalize(),
        };
        Ok(Self {
            path,
            snapshot: RwLock::new(snapshot),
        })
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = AppConfig::load_from(&path)?;
        Ok(Self {
            path: Some(path),
            snapshot: RwLock::new(snapshot),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl ConfigSource for FileConfigSource {
    fn current(&self) -> AppConfig {
        self.snapshot.read().clone()
    }

    fn refresh(&self) -> AppConfig {
        let loaded = match &self.path {
            Some(p) => AppConfig::load_from(p),
            None => Ok(AppConfig::default().finalize()),
        };
        match loaded {
            Ok(cfg) => {
                *self.snapshot.write() = cfg.clone();
                cfg
            }
            Err(e) => {
                tracing::warn!(error = %e, "config refresh failed, keeping previous snapshot");
                self.current()
            }
        }
    }
}

/// In-memory source; `set` swaps the snapshot the next refresh returns.
#[derive(Debug, Default)]
pub struct StaticConfigSource {
    inner: RwLock<AppConfig>,
}

impl StaticConfigSource {
    pub fn new(cfg: AppConfig) -> Self {
        Self {
            inner: RwLock::new(cfg),
        }
    }

    pub fn set(&self, cfg: AppConfig) {
        *self.inner.write() = cfg;
    }
}

impl ConfigSource for StaticConfigSource {
    fn current(&self) -> AppConfig {
        self.inner.read().clone()
    }
}
