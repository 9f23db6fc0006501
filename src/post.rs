// src/post.rs
//! Observed post and its fingerprint.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MonitorError, Result};

/// Characters of body text that go into a permalink-less fingerprint.
pub const FINGERPRINT_PREFIX_CHARS: usize = 50;

/// Identity of a post. Two posts with equal fingerprints are the same post.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One observed unit of content. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    account_id: String,
    body: String,
    observed_at: String,
    permalink: Option<String>,
}

impl Post {
    /// Fails if `account_id`, `body` or `observed_at` is empty.
    pub fn new(
        account_id: impl Into<String>,
        body: impl Into<String>,
        observed_at: impl Into<String>,
        permalink: Option<String>,
    ) -> Result<Self> {
        let account_id = account_id.into();
        let body = body.into();
        let observed_at = observed_at.into();

        if account_id.is_empty() {
            return Err(MonitorError::InvalidPost { field: "account_id" });
        }
        if body.is_empty() {
            return Err(MonitorError::InvalidPost { field: "body" });
        }
        if observed_at.is_empty() {
            return Err(MonitorError::InvalidPost {
                field: "observed_at",
            });
        }

        Ok(Self {
            account_id,
            body,
            observed_at,
            permalink: permalink.filter(|p| !p.is_empty()),
        })
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn observed_at(&self) -> &str {
        &self.observed_at
    }

    pub fn permalink(&self) -> Option<&str> {
        self.permalink.as_deref()
    }

    /// Permalink when present, otherwise `"<first 50 chars of body>_<observed_at>"`.
    pub fn fingerprint(&self) -> Fingerprint {
        match &self.permalink {
            Some(url) => Fingerprint(url.clone()),
            None => {
                let prefix: String = self.body.chars().take(FINGERPRINT_PREFIX_CHARS).collect();
                Fingerprint(format!("{prefix}_{}", self.observed_at))
            }
        }
    }
}
