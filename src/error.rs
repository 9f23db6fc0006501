//! Error types for the monitor core.
//!
//! Operational failures (network errors, bad statuses, empty pages) are not
//! errors at this level: they degrade to `None` or to a failed
//! [`DeliveryOutcome`](crate::notify::DeliveryOutcome). What remains here are
//! contract violations and setup problems.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MonitorError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("invalid post: {field} cannot be empty")]
    InvalidPost { field: &'static str },

    #[error("cannot notify for a post from @{account} without a permalink")]
    MissingPermalink { account: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("browser not started; call start() first")]
    BrowserNotStarted,

    #[error("no session available in pool for {domain}")]
    PoolExhausted { domain: String },
}
