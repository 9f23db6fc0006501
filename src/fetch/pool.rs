// src/fetch/pool.rs
//! Optional bounded pool of browser sessions per domain.
//!
//! Checkout hands out a [`PooledSession`] guard; the session goes back to the
//! idle list when the guard is dropped, on every exit path. An exhausted pool
//! either fails immediately or waits up to a fixed timeout, never unbounded.
//! Pooled sessions keep the identity they were created with.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::browser::{Browser, BrowserSession, SessionIdentity};
use crate::error::MonitorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPolicy {
    FailFast,
    Wait(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub available: usize,
    pub in_use: usize,
    pub total: usize,
    pub max_sessions: usize,
}

pub struct SessionPool {
    domain: String,
    max_sessions: usize,
    policy: PoolPolicy,
    idle: Mutex<Vec<Box<dyn BrowserSession>>>,
    permits: Arc<Semaphore>,
    in_use: AtomicUsize,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("domain", &self.domain)
            .field("stats", &self.stats())
            .finish()
    }
}

impl SessionPool {
    pub fn new(domain: impl Into<String>, max_sessions: usize, policy: PoolPolicy) -> Arc<Self> {
        let max_sessions = max_sessions.max(1);
        Arc::new(Self {
            domain: domain.into(),
            max_sessions,
            policy,
            idle: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(max_sessions)),
            in_use: AtomicUsize::new(0),
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Reuse an idle session or create one under the cap.
    pub async fn checkout(
        self: &Arc<Self>,
        browser: &dyn Browser,
        identity: &SessionIdentity,
    ) -> anyhow::Result<PooledSession> {
        let permit = match self.policy {
            PoolPolicy::FailFast => self.permits.clone().try_acquire_owned().ok(),
            PoolPolicy::Wait(limit) => {
                tokio::time::timeout(limit, self.permits.clone().acquire_owned())
                    .await
                    .ok()
                    .and_then(|r| r.ok())
            }
        };
        let Some(permit) = permit else {
            return Err(MonitorError::PoolExhausted {
                domain: self.domain.clone(),
            }
            .into());
        };

        let reused = self.idle.lock().pop();
        let session = match reused {
            Some(s) => s,
            None => browser.new_session(identity).await?,
        };

        self.in_use.fetch_add(1, Ordering::SeqCst);
        Ok(PooledSession {
            session: Some(session),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    fn give_back(&self, session: Box<dyn BrowserSession>) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
        self.idle.lock().push(session);
    }

    /// Close every idle session. Sessions still checked out are closed by
    /// their holders.
    pub async fn close_all(&self) {
        let drained: Vec<_> = std::mem::take(&mut *self.idle.lock());
        for mut s in drained {
            s.close().await;
        }
    }

    pub fn stats(&self) -> PoolStats {
        let available = self.idle.lock().len();
        let in_use = self.in_use.load(Ordering::SeqCst);
        PoolStats {
            available,
            in_use,
            total: available + in_use,
            max_sessions: self.max_sessions,
        }
    }
}

/// Checked-out session; returned to its pool on drop.
pub struct PooledSession {
    session: Option<Box<dyn BrowserSession>>,
    pool: Arc<SessionPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    pub fn session_mut(&mut self) -> &mut dyn BrowserSession {
        self.session
            .as_deref_mut()
            .expect("pooled session is present until drop")
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(s) = self.session.take() {
            self.pool.give_back(s);
        }
    }
}
