// src/logging.rs
//! Process-wide tracing setup.

use std::str::FromStr;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_FILTER: &str = "feed_monitor=info,warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "compact" | "" => Ok(Self::Text),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

impl LogFormat {
    /// `LOG_FORMAT` wins over the configured value; unknown values mean text.
    pub fn resolve(configured: Option<&str>) -> Self {
        std::env::var("LOG_FORMAT")
            .ok()
            .as_deref()
            .or(configured)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

/// `RUST_LOG` first, then the configured level, then [`DEFAULT_FILTER`].
pub fn build_filter(configured_level: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        configured_level
            .and_then(|l| EnvFilter::try_new(l).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
    })
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_tracing(format: LogFormat, configured_level: Option<&str>) {
    let filter = build_filter(configured_level);
    let registry = tracing_subscriber::registry().with(filter);
    let res = match format {
        LogFormat::Text => registry.with(fmt::layer().compact()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
