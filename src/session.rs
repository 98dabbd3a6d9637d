//! Session store for consolidation results.
//!
//! Holds the most recent result per batch under an opaque session id so later
//! report requests can find it. Entries expire after a TTL; expired entries
//! are pruned whenever a new result is published. Results are written exactly
//! once per batch, after the whole batch completes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::schema::ConsolidationResult;

struct Entry {
    result: ConsolidationResult,
    expires_at: Instant,
}

/// In-memory TTL'd key-value store for batch results.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh opaque session id.
    pub fn new_session_id() -> String {
        format!("sess_{}", Uuid::new_v4().simple())
    }

    /// Publish a batch result under `id`, replacing any previous value and
    /// pruning expired entries.
    pub fn put(&self, id: &str, result: ConsolidationResult, ttl: Duration) {
        let now = Instant::now();
        let mut store = self.inner.write().unwrap();
        store.retain(|_, entry| entry.expires_at > now);
        store.insert(
            id.to_string(),
            Entry {
                result,
                expires_at: now + ttl,
            },
        );
        tracing::debug!("SessionStore: published result for {} ({} live)", id, store.len());
    }

    /// Fetch a live result; expired or unknown sessions return `None`.
    pub fn get(&self, id: &str) -> Option<ConsolidationResult> {
        let store = self.inner.read().unwrap();
        let entry = store.get(id)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.result.clone())
    }

    /// Drop a session eagerly. Returns true if it existed.
    pub fn remove(&self, id: &str) -> bool {
        self.inner.write().unwrap().remove(id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ProcessingInfo;

    fn result() -> ConsolidationResult {
        ConsolidationResult {
            products: Vec::new(),
            total_products: 0,
            total_value: 0.0,
            processing_info: ProcessingInfo::default(),
        }
    }

    #[test]
    fn put_then_get() {
        let store = SessionStore::new();
        store.put("s1", result(), Duration::from_secs(60));
        assert!(store.get("s1").is_some());
        assert!(store.get("s2").is_none());
    }

    #[test]
    fn expired_session_is_gone() {
        let store = SessionStore::new();
        store.put("s1", result(), Duration::from_secs(0));
        assert!(store.get("s1").is_none());
    }

    #[test]
    fn put_prunes_expired_entries() {
        let store = SessionStore::new();
        store.put("old", result(), Duration::from_secs(0));
        store.put("new", result(), Duration::from_secs(60));
        assert_eq!(store.inner.read().unwrap().len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let store = SessionStore::new();
        store.put("s1", result(), Duration::from_secs(60));
        assert!(store.remove("s1"));
        assert!(!store.remove("s1"));
        assert!(store.get("s1").is_none());
    }

    #[test]
    fn session_ids_are_unique() {
        let a = SessionStore::new_session_id();
        let b = SessionStore::new_session_id();
        assert_ne!(a, b);
        assert!(a.starts_with("sess_"));
    }
}
