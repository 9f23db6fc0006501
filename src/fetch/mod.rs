// src/fetch/mod.rs
//! Browser sessions and rate-limited navigation to profile pages.

pub mod browser;
pub mod gateway;
pub mod pool;

pub use browser::{Browser, BrowserSession, HttpBrowser, SessionIdentity};
pub use gateway::{FetchGateway, GatewayConfig, PoolSettings, Session};
pub use pool::{PoolPolicy, PoolStats, PooledSession, SessionPool};
