// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod baseline;
pub mod config;
pub mod domains;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod notify;
pub mod page;
pub mod post;
pub mod rate_limiter;

// ---- Re-exports for stable public API ----
pub use crate::baseline::BaselineStore;
pub use crate::config::{AppConfig, ConfigSource, FileConfigSource, StaticConfigSource};
pub use crate::error::{MonitorError, Result};
pub use crate::extract::PostExtractor;
pub use crate::fetch::{FetchGateway, HttpBrowser};
pub use crate::monitor::{AccountOutcome, CycleReport, Monitor, MonitorState};
pub use crate::notify::{DeliveryNotifier, DeliveryOutcome, LogNotifier, PostNotifier};
pub use crate::post::{Fingerprint, Post};
pub use crate::rate_limiter::{RateLimitConfig, RateLimiter};
