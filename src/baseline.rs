//! baseline.rs: in-memory "last seen" fingerprint per account.
//!
//! No entry for an account means it was never checked; that is a different
//! state from "checked, nothing found", which leaves the map untouched.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::post::{Fingerprint, Post};

#[derive(Debug, Default)]
pub struct BaselineStore {
    inner: RwLock<HashMap<String, Fingerprint>>,
}

impl BaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_fingerprint(&self, account_id: &str) -> Option<Fingerprint> {
        self.inner.read().get(account_id).cloned()
    }

    pub fn has_seen(&self, account_id: &str) -> bool {
        self.inner.read().contains_key(account_id)
    }

    /// True when the account has no baseline yet or the fingerprint differs.
    pub fn is_new(&self, account_id: &str, post: &Post) -> bool {
        match self.inner.read().get(account_id) {
            None => true,
            Some(last) => *last != post.fingerprint(),
        }
    }

    /// Overwrite the account's baseline with `post`'s fingerprint.
    pub fn record(&self, account_id: &str, post: &Post) {
        self.inner
            .write()
            .insert(account_id.to_string(), post.fingerprint());
    }

    pub fn tracked_accounts(&self) -> Vec<String> {
        let mut v: Vec<String> = self.inner.read().keys().cloned().collect();
        v.sort();
        v
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Drop every baseline. Test reset only.
    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(link: &str) -> Post {
        Post::new("nasa", "body", "2024-01-01T00:00:00Z", Some(link.to_string())).unwrap()
    }

    #[test]
    fn unseen_account_is_new() {
        let store = BaselineStore::new();
        assert!(store.last_fingerprint("nasa").is_none());
        assert!(!store.has_seen("nasa"));
        assert!(store.is_new("nasa", &post("https://x.com/nasa/status/1")));
    }

    #[test]
    fn same_fingerprint_is_not_new_and_different_is() {
        let store = BaselineStore::new();
        store.record("nasa", &post("https://x.com/nasa/status/111"));
        assert!(!store.is_new("nasa", &post("https://x.com/nasa/status/111")));
        assert!(store.is_new("nasa", &post("https://x.com/nasa/status/222")));

        store.record("nasa", &post("https://x.com/nasa/status/222"));
        assert_eq!(
            store.last_fingerprint("nasa").unwrap().as_str(),
            "https://x.com/nasa/status/222"
        );
    }

    #[test]
    fn accounts_are_independent_and_clear_resets() {
        let store = BaselineStore::new();
        store.record("nasa", &post("https://x.com/nasa/status/1"));
        store.record("esa", &post("https://x.com/esa/status/1"));
        assert_eq!(store.tracked_accounts(), vec!["esa".to_string(), "nasa".to_string()]);
        assert_eq!(store.len(), 2);

        store.clear();
        assert!(store.is_empty());
        assert!(!store.has_seen("nasa"));
    }
}
