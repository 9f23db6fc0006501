//! Per-domain request pacing.
//!
//! Sliding 60 s window of request timestamps per domain, a backoff once the
//! window reaches the domain's quota, and a uniformly random "human" delay
//! on every request that is under quota. The limiter only computes waits;
//! the caller sleeps.

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Length of the trailing request window.
pub const WINDOW: Duration = Duration::from_secs(60);

fn default_rpm() -> u32 {
    30
}
fn default_burst() -> u32 {
    5
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_backoff() -> u64 {
    300
}
fn default_min_delay() -> f64 {
    2.0
}
fn default_max_delay() -> f64 {
    8.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,
    /// Carried for parity with stored profiles; pacing does not consult it.
    #[serde(default = "default_burst")]
    pub burst_limit: u32,
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
    #[serde(default = "default_min_delay")]
    pub min_delay_secs: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_rpm(),
            burst_limit: default_burst(),
            backoff_multiplier: default_multiplier(),
            max_backoff_secs: default_max_backoff(),
            min_delay_secs: default_min_delay(),
            max_delay_secs: default_max_delay(),
        }
    }
}

impl RateLimitConfig {
    /// Conservative profile used for x.com / twitter.com.
    pub fn conservative() -> Self {
        Self {
            requests_per_minute: 10,
            min_delay_secs: 3.0,
            max_delay_secs: 12.0,
            backoff_multiplier: 2.5,
            max_backoff_secs: 600,
            ..Self::default()
        }
    }

    /// Clamp values that would make the pacing math misbehave.
    pub fn sanitized(mut self) -> Self {
        if self.requests_per_minute == 0 {
            self.requests_per_minute = 1;
        }
        if !self.min_delay_secs.is_finite() || self.min_delay_secs < 0.0 {
            self.min_delay_secs = 0.0;
        }
        if !self.max_delay_secs.is_finite() || self.max_delay_secs < 0.0 {
            self.max_delay_secs = 0.0;
        }
        if self.min_delay_secs > self.max_delay_secs {
            std::mem::swap(&mut self.min_delay_secs, &mut self.max_delay_secs);
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            self.backoff_multiplier = 1.0;
        }
        self
    }

    fn backoff_for(&self, window_count: usize) -> Duration {
        let exp = i32::try_from(window_count).unwrap_or(i32::MAX);
        let secs = self
            .backoff_multiplier
            .powi(exp)
            .min(self.max_backoff_secs as f64);
        Duration::from_secs_f64(secs)
    }

    fn random_delay(&self) -> Duration {
        let secs = if self.max_delay_secs > self.min_delay_secs {
            rand::rng().random_range(self.min_delay_secs..=self.max_delay_secs)
        } else {
            self.min_delay_secs
        };
        Duration::from_secs_f64(secs)
    }
}

#[derive(Debug, Default)]
struct DomainWindow {
    requests: VecDeque<Instant>,
    backoff_until: Option<Instant>,
}

impl DomainWindow {
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.requests.front() {
            if now.saturating_duration_since(*front) > WINDOW {
                self.requests.pop_front();
            } else {
                break;
            }
        }
    }

    fn backoff_remaining(&self, now: Instant) -> Option<Duration> {
        self.backoff_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }
}

/// Snapshot of one domain's pacing state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStats {
    pub requests_in_last_minute: usize,
    pub requests_per_minute_limit: u32,
    pub is_rate_limited: bool,
    /// Seconds left in the current backoff, if any.
    pub backoff_remaining_secs: Option<f64>,
    pub domain_config: RateLimitConfig,
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    default_config: RateLimitConfig,
    domain_configs: HashMap<String, RateLimitConfig>,
    windows: Mutex<HashMap<String, DomainWindow>>,
}

impl RateLimiter {
    pub fn new(default_config: RateLimitConfig) -> Self {
        Self {
            default_config: default_config.sanitized(),
            domain_configs: HashMap::new(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Register a per-domain override.
    pub fn with_domain(mut self, domain: impl Into<String>, config: RateLimitConfig) -> Self {
        self.domain_configs.insert(domain.into(), config.sanitized());
        self
    }

    pub fn domain_config(&self, domain: &str) -> &RateLimitConfig {
        self.domain_configs
            .get(domain)
            .unwrap_or(&self.default_config)
    }

    /// How long to pause before the next request to `domain`.
    pub fn should_wait(&self, domain: &str) -> Duration {
        self.should_wait_at(domain, Instant::now())
    }

    pub fn should_wait_at(&self, domain: &str, now: Instant) -> Duration {
        let config = self.domain_config(domain);
        let mut windows = self.windows.lock();
        let window = windows.entry(domain.to_string()).or_default();

        if let Some(remaining) = window.backoff_remaining(now) {
            return remaining;
        }

        window.prune(now);
        let count = window.requests.len();
        if count >= config.requests_per_minute as usize {
            let backoff = config.backoff_for(count);
            window.backoff_until = Some(now + backoff);
            tracing::warn!(
                domain,
                requests = count,
                backoff_ms = backoff.as_millis() as u64,
                "request quota reached, backing off"
            );
            metrics::gauge!("rate_limiter_backoff_secs", "domain" => domain.to_string())
                .set(backoff.as_secs_f64());
            return backoff;
        }

        config.random_delay()
    }

    /// Append a request timestamp to `domain`'s window.
    pub fn record(&self, domain: &str) {
        self.record_at(domain, Instant::now());
    }

    pub fn record_at(&self, domain: &str, at: Instant) {
        let mut windows = self.windows.lock();
        windows
            .entry(domain.to_string())
            .or_default()
            .requests
            .push_back(at);
    }

    pub fn is_rate_limited(&self, domain: &str) -> bool {
        self.is_rate_limited_at(domain, Instant::now())
    }

    pub fn is_rate_limited_at(&self, domain: &str, now: Instant) -> bool {
        let quota = self.domain_config(domain).requests_per_minute as usize;
        let mut windows = self.windows.lock();
        let window = windows.entry(domain.to_string()).or_default();
        if window.backoff_remaining(now).is_some() {
            return true;
        }
        window.prune(now);
        window.requests.len() >= quota
    }

    pub fn stats(&self, domain: &str) -> RateLimitStats {
        self.stats_at(domain, Instant::now())
    }

    pub fn stats_at(&self, domain: &str, now: Instant) -> RateLimitStats {
        let config = self.domain_config(domain).clone();
        let mut windows = self.windows.lock();
        let window = windows.entry(domain.to_string()).or_default();
        window.prune(now);

        let backoff = window.backoff_remaining(now);
        let count = window.requests.len();
        RateLimitStats {
            requests_in_last_minute: count,
            requests_per_minute_limit: config.requests_per_minute,
            is_rate_limited: backoff.is_some() || count >= config.requests_per_minute as usize,
            backoff_remaining_secs: backoff.map(|d| d.as_secs_f64()),
            domain_config: config,
        }
    }

    /// Domains that have been referenced at least once.
    pub fn known_domains(&self) -> Vec<String> {
        let mut v: Vec<String> = self.windows.lock().keys().cloned().collect();
        v.sort();
        v
    }

    pub fn reset_domain(&self, domain: &str) {
        if let Some(window) = self.windows.lock().get_mut(domain) {
            window.requests.clear();
            window.backoff_until = None;
        }
    }

    pub fn reset_all(&self) {
        self.windows.lock().clear();
    }
}
