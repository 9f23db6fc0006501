// src/notify/delivery.rs
//! Form-encoded webhook delivery with bounded retry.

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use metrics::counter;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::{format_message, require_permalink, DeliveryOutcome, PostNotifier};
use crate::error::Result;
use crate::post::Post;

/// Header carrying the delivery credential.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Transport for one delivery attempt. Returns the HTTP status and the
/// response body (JSON when parseable, otherwise the raw text as a string).
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn post_form(
        &self,
        url: &str,
        fields: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> AnyResult<(u16, Value)>;
}

#[derive(Clone)]
pub struct HttpDeliveryChannel {
    client: Client,
    timeout: Duration,
}

impl HttpDeliveryChannel {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl DeliveryChannel for HttpDeliveryChannel {
    async fn post_form(
        &self,
        url: &str,
        fields: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> AnyResult<(u16, Value)> {
        let mut req = self.client.post(url).timeout(self.timeout).form(fields);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        let rsp = req.send().await.context("delivery request failed")?;
        let status = rsp.status().as_u16();
        let text = rsp.text().await.context("reading delivery response")?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok((status, body))
    }
}

/// Delay before attempt `attempt + 1`: `min(2^(attempt-1), 10)` units.
pub fn backoff_delay(attempt: u32, unit: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1)).min(10);
    unit * factor
}

pub struct DeliveryNotifier {
    channel: Arc<dyn DeliveryChannel>,
    endpoint: String,
    api_key: String,
    max_attempts: u32,
    backoff_unit: Duration,
}

impl DeliveryNotifier {
    pub fn new(channel: Arc<dyn DeliveryChannel>, endpoint: String, api_key: String) -> Self {
        Self {
            channel,
            endpoint,
            api_key,
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
        }
    }

    /// HTTP-backed notifier with the given per-attempt timeout.
    pub fn http(endpoint: String, api_key: String, timeout: Duration) -> Self {
        Self::new(Arc::new(HttpDeliveryChannel::new(timeout)), endpoint, api_key)
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send `message` with `url`, retrying any status >= 400 and transport
    /// errors until `max_attempts` is used up.
    pub async fn deliver(&self, message: &str, url: &str) -> DeliveryOutcome {
        let fields = [("Message", message), ("Url", url)];
        let headers = [(API_KEY_HEADER, self.api_key.as_str())];

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            counter!("notify_attempts_total").increment(1);

            let outcome = match self.channel.post_form(&self.endpoint, &fields, &headers).await {
                Ok((status, body)) => DeliveryOutcome::from_response(status, body),
                Err(e) => DeliveryOutcome::transport_failure(format!("{e:#}")),
            };
            let outcome = outcome.with_attempts(attempt);

            let retriable = outcome.status_code == 0 || outcome.status_code >= 400;
            if !retriable {
                if !outcome.success {
                    counter!("notify_failures_total").increment(1);
                    tracing::warn!(status = outcome.status_code, error = ?outcome.error, "delivery rejected");
                }
                return outcome;
            }

            if attempt >= self.max_attempts {
                counter!("notify_failures_total").increment(1);
                tracing::error!(
                    attempts = attempt,
                    status = outcome.status_code,
                    error = ?outcome.error,
                    "delivery failed, giving up"
                );
                return outcome;
            }

            if matches!(outcome.status_code, 401 | 403) {
                tracing::warn!(status = outcome.status_code, "delivery endpoint rejected the credential; retrying anyway");
            }
            let delay = backoff_delay(attempt, self.backoff_unit);
            tracing::warn!(
                attempt,
                max_attempts = self.max_attempts,
                status = outcome.status_code,
                delay_ms = delay.as_millis() as u64,
                "delivery attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl PostNotifier for DeliveryNotifier {
    async fn notify_new_post(&self, post: &Post) -> Result<DeliveryOutcome> {
        let url = require_permalink(post)?;
        let message = format_message(post);
        let outcome = self.deliver(&message, url).await;
        if outcome.success {
            tracing::info!(account = %post.account_id(), attempts = outcome.attempts, "notification sent");
        }
        Ok(outcome)
    }

    fn name(&self) -> &'static str {
        "delivery"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;
    use anyhow::anyhow;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    #[derive(Debug, Clone)]
    struct Call {
        fields: Vec<(String, String)>,
        headers: Vec<(String, String)>,
    }

    #[derive(Default)]
    struct Scripted {
        replies: Mutex<VecDeque<AnyResult<(u16, Value)>>>,
        calls: Mutex<Vec<Call>>,
    }

    impl Scripted {
        fn with(replies: Vec<AnyResult<(u16, Value)>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl DeliveryChannel for Scripted {
        async fn post_form(
            &self,
            _url: &str,
            fields: &[(&str, &str)],
            headers: &[(&str, &str)],
        ) -> AnyResult<(u16, Value)> {
            let own = |v: &[(&str, &str)]| {
                v.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<Vec<_>>()
            };
            self.calls.lock().push(Call {
                fields: own(fields),
                headers: own(headers),
            });
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok((200, json!({"message": "ok"}))))
        }
    }

    fn notifier(ch: Arc<Scripted>) -> DeliveryNotifier {
        DeliveryNotifier::new(ch, "https://hooks.test/send".into(), "k3y".into())
    }

    fn post() -> Post {
        Post::new(
            "nasa",
            "New result",
            "2024-05-01T10:00:00Z",
            Some("https://x.com/nasa/status/222".into()),
        )
        .unwrap()
    }

    #[test]
    fn backoff_doubles_and_caps_at_ten_units() {
        let u = Duration::from_secs(1);
        assert_eq!(backoff_delay(1, u), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, u), Duration::from_secs(2));
        assert_eq!(backoff_delay(4, u), Duration::from_secs(8));
        assert_eq!(backoff_delay(5, u), Duration::from_secs(10));
        assert_eq!(backoff_delay(40, u), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_three_attempts_with_two_waits() {
        let ch = Scripted::with(vec![
            Ok((500, json!({"error": "boom"}))),
            Ok((500, json!({"error": "boom"}))),
            Ok((500, json!({"error": "boom"}))),
        ]);
        let n = notifier(ch.clone());

        let t0 = tokio::time::Instant::now();
        let out = n.notify_new_post(&post()).await.unwrap();
        assert!(!out.success);
        assert_eq!(out.status_code, 500);
        assert_eq!(out.attempts, 3);
        assert_eq!(ch.calls.lock().len(), 3);
        // 1s + 2s between the three attempts
        assert_eq!(t0.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_third_attempt() {
        let ch = Scripted::with(vec![
            Ok((500, json!({}))),
            Ok((500, json!({}))),
            Ok((200, json!({"message": "sent"}))),
        ]);
        let out = notifier(ch.clone()).notify_new_post(&post()).await.unwrap();
        assert!(out.success);
        assert_eq!(out.attempts, 3);
        assert_eq!(out.message.as_deref(), Some("sent"));
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_retried_too() {
        let ch = Scripted::with(vec![Ok((401, json!({}))), Ok((200, json!({})))]);
        let out = notifier(ch.clone()).notify_new_post(&post()).await.unwrap();
        assert!(out.success);
        assert_eq!(ch.calls.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_become_status_zero() {
        let ch = Scripted::with(vec![
            Err(anyhow!("connection refused")),
            Err(anyhow!("connection refused")),
            Err(anyhow!("connection refused")),
        ]);
        let out = notifier(ch.clone()).notify_new_post(&post()).await.unwrap();
        assert_eq!(out.status_code, 0);
        assert!(!out.success);
        assert!(out.error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn sends_form_fields_and_api_key() {
        let ch = Scripted::with(vec![]);
        notifier(ch.clone()).notify_new_post(&post()).await.unwrap();

        let calls = ch.calls.lock();
        let call = &calls[0];
        assert_eq!(call.fields[0].0, "Message");
        assert!(call.fields[0].1.contains("New result"));
        assert_eq!(
            call.fields[1],
            ("Url".to_string(), "https://x.com/nasa/status/222".to_string())
        );
        assert_eq!(call.headers, vec![("x-api-key".to_string(), "k3y".to_string())]);
    }

    #[tokio::test]
    async fn missing_permalink_is_rejected_before_sending() {
        let ch = Scripted::with(vec![]);
        let bare = Post::new("nasa", "x", "t", None).unwrap();
        let err = notifier(ch.clone()).notify_new_post(&bare).await.unwrap_err();
        assert!(matches!(err, MonitorError::MissingPermalink { .. }));
        assert!(ch.calls.lock().is_empty());
    }
}
