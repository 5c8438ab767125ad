//! Replay cache (spec.md §3 `ReplayCacheEntry`, §4.1 check 9, §5).
//!
//! The hot path of the whole verifier: `check_and_store` must be a single atomic
//! compare-and-swap, never a separate check-then-insert, or concurrent submissions of the
//! same mandate id can both observe "absent" and both proceed (spec.md §5, Testable
//! Property 2).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait ReplayCache: Send + Sync {
    /// Atomically inserts `key` with the given expiry if no active (non-expired) entry
    /// exists. Returns `true` if this call performed the insert (key was absent or its
    /// previous entry had expired), `false` if an active entry already existed.
    async fn check_and_store(&self, key: &str, expires_at: DateTime<Utc>) -> bool;

    async fn contains_active(&self, key: &str) -> bool;
}

#[derive(Default)]
pub struct InMemoryReplayCache {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryReplayCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReplayCache for InMemoryReplayCache {
    async fn check_and_store(&self, key: &str, expires_at: DateTime<Utc>) -> bool {
        let mut guard = self.entries.lock().expect("replay cache mutex poisoned");
        let now = Utc::now();
        if let Some(existing_expiry) = guard.get(key) {
            if *existing_expiry > now {
                return false;
            }
        }
        guard.insert(key.to_string(), expires_at);
        true
    }

    async fn contains_active(&self, key: &str) -> bool {
        let guard = self.entries.lock().expect("replay cache mutex poisoned");
        guard.get(key).map(|exp| *exp > Utc::now()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_insert_succeeds_second_is_rejected() {
        let cache = InMemoryReplayCache::new();
        let expiry = Utc::now() + chrono::Duration::hours(1);
        assert!(cache.check_and_store("mandate_1", expiry).await);
        assert!(!cache.check_and_store("mandate_1", expiry).await);
    }

    #[tokio::test]
    async fn expired_entry_can_be_reinserted() {
        let cache = InMemoryReplayCache::new();
        let already_expired = Utc::now() - chrono::Duration::hours(1);
        assert!(cache.check_and_store("mandate_2", already_expired).await);
        assert!(cache.check_and_store("mandate_2", Utc::now() + chrono::Duration::hours(1)).await);
    }

    #[tokio::test]
    async fn concurrent_inserts_yield_exactly_one_winner() {
        use std::sync::Arc;
        let cache = Arc::new(InMemoryReplayCache::new());
        let expiry = Utc::now() + chrono::Duration::hours(1);
        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.check_and_store("mandate_shared", expiry).await
            }));
        }
        let mut accepted = 0;
        for h in handles {
            if h.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }
}
