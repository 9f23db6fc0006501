//! Outbound notifications for newly detected posts.

pub mod delivery;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::{MonitorError, Result};
use crate::post::Post;

pub use delivery::{DeliveryChannel, DeliveryNotifier, HttpDeliveryChannel};

/// Longest body (in characters) carried in a message before truncation.
pub const MAX_BODY_CHARS: usize = 500;

/// Human-readable message for `post`. The permalink travels separately.
pub fn format_message(post: &Post) -> String {
    let body = post.body();
    let body = if body.chars().count() > MAX_BODY_CHARS {
        let cut: String = body.chars().take(MAX_BODY_CHARS).collect();
        format!("{cut}...")
    } else {
        body.to_string()
    };
    format!(
        "🔔 New post from @{}\n\n{}\n\n📅 {}",
        post.account_id(),
        body,
        post.observed_at()
    )
}

/// Result of one notification, after all retries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryOutcome {
    /// HTTP status of the last attempt; 0 when no response was received.
    pub status_code: u16,
    pub success: bool,
    pub message: Option<String>,
    pub error: Option<String>,
    pub data: Option<Value>,
    pub raw: Value,
    pub attempts: u32,
}

fn first_key<'a>(body: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| body.get(*k))
        .find(|v| !v.is_null())
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl DeliveryOutcome {
    /// Interpret a delivery endpoint's response.
    pub fn from_response(status_code: u16, body: Value) -> Self {
        let message = first_key(&body, &["message", "Message"]).map(value_text);
        let error = first_key(&body, &["exception", "error", "Error"]).map(value_text);
        let data = first_key(&body, &["data", "Data"]).cloned();
        let success = (200..300).contains(&status_code) && error.is_none();
        Self {
            status_code,
            success,
            message,
            error,
            data,
            raw: body,
            attempts: 1,
        }
    }

    /// No response at all (connect failure, timeout).
    pub fn transport_failure(error: impl Into<String>) -> Self {
        Self {
            status_code: 0,
            success: false,
            message: None,
            error: Some(error.into()),
            data: None,
            raw: Value::Null,
            attempts: 1,
        }
    }

    /// Delivered somewhere local (the log) rather than over the wire.
    pub fn local(message: impl Into<String>) -> Self {
        Self {
            status_code: 0,
            success: true,
            message: Some(message.into()),
            error: None,
            data: None,
            raw: Value::Null,
            attempts: 0,
        }
    }

    fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

#[async_trait]
pub trait PostNotifier: Send + Sync {
    /// Deliver a notice for `post`.
    ///
    /// Only a post without a permalink is an `Err`; delivery problems come
    /// back as an unsuccessful [`DeliveryOutcome`].
    async fn notify_new_post(&self, post: &Post) -> Result<DeliveryOutcome>;

    fn name(&self) -> &'static str;
}

pub(crate) fn require_permalink(post: &Post) -> Result<&str> {
    post.permalink().ok_or_else(|| MonitorError::MissingPermalink {
        account: post.account_id().to_string(),
    })
}

/// Used when no delivery endpoint is configured: the post goes to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl PostNotifier for LogNotifier {
    async fn notify_new_post(&self, post: &Post) -> Result<DeliveryOutcome> {
        let url = require_permalink(post)?;
        let preview: String = post.body().chars().take(200).collect();
        tracing::info!(
            account = %post.account_id(),
            observed_at = %post.observed_at(),
            url = %url,
            content = %preview,
            "NEW POST"
        );
        Ok(DeliveryOutcome::local("logged"))
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
