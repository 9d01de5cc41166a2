//! TTL cache for arbitration verdicts.
//!
//! Keys depend on both memory ids and both topic sets, so a memory whose
//! topics change is re-arbitrated. Entries expire after a fixed TTL and a
//! background task sweeps them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::verdict::ArbitrationVerdict;

pub const DEFAULT_CACHE_TTL_HOURS: i64 = 24;

/// Stable cache key for one (source, candidate) pair.
///
/// Topic order does not matter; the sets are sorted before hashing.
pub fn cache_key<S: AsRef<str>>(
    source_id: &str,
    candidate_id: &str,
    source_topics: &[S],
    candidate_topics: &[S],
) -> String {
    fn sorted<S: AsRef<str>>(topics: &[S]) -> Vec<&str> {
        let mut v: Vec<&str> = topics.iter().map(AsRef::as_ref).collect();
        v.sort_unstable();
        v.dedup();
        v
    }

    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(candidate_id.as_bytes());
    for set in [sorted(source_topics), sorted(candidate_topics)] {
        hasher.update([0u8]);
        for t in set {
            hasher.update(t.as_bytes());
            hasher.update([0x1f]);
        }
    }
    hex::encode(hasher.finalize())
}

/// Shared verdict cache.
pub trait ArbitrationCache: Send + Sync {
    fn get(&self, key: &str) -> Option<ArbitrationVerdict>;
    fn put(&self, key: String, verdict: ArbitrationVerdict);
    /// Drop expired entries, returning how many were removed.
    fn sweep_expired(&self) -> usize;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `RwLock<HashMap>` cache with a fixed TTL.
pub struct InMemoryArbitrationCache {
    ttl: chrono::Duration,
    entries: RwLock<HashMap<String, (ArbitrationVerdict, DateTime<Utc>)>>,
}

impl Default for InMemoryArbitrationCache {
    fn default() -> Self {
        Self::new(chrono::Duration::hours(DEFAULT_CACHE_TTL_HOURS))
    }
}

impl InMemoryArbitrationCache {
    pub fn new(ttl: chrono::Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, (ArbitrationVerdict, DateTime<Utc>)>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, (ArbitrationVerdict, DateTime<Utc>)>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    fn expired(&self, stored: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now >= stored + self.ttl
    }

    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<ArbitrationVerdict> {
        self.read()
            .get(key)
            .filter(|(_, stored)| !self.expired(*stored, now))
            .map(|(v, _)| v.clone())
    }

    pub fn put_at(&self, key: String, verdict: ArbitrationVerdict, now: DateTime<Utc>) {
        self.write().insert(key, (verdict, now));
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, (_, stored)| now < *stored + self.ttl);
        before - entries.len()
    }
}

impl ArbitrationCache for InMemoryArbitrationCache {
    fn get(&self, key: &str) -> Option<ArbitrationVerdict> {
        self.get_at(key, Utc::now())
    }

    fn put(&self, key: String, verdict: ArbitrationVerdict) {
        self.put_at(key, verdict, Utc::now());
    }

    fn sweep_expired(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    fn len(&self) -> usize {
        self.read().len()
    }
}

/// Spawn a task that sweeps `cache` every `interval`.
///
/// The first sweep happens one full interval after spawning.
pub fn spawn_cache_sweeper(cache: Arc<dyn ArbitrationCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = cache.sweep_expired();
            if removed > 0 {
                debug!(removed, remaining = cache.len(), "Swept arbitration cache");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict() -> ArbitrationVerdict {
        ArbitrationVerdict {
            is_relevant: true,
            relevance_score: 0.9,
            relationship_type: "semantic".into(),
            reasoning: "same topic".into(),
        }
    }

    #[test]
    fn key_ignores_topic_order_but_not_direction() {
        let a = cache_key("s", "c", &["rust", "async"], &["graphs"]);
        let b = cache_key("s", "c", &["async", "rust"], &["graphs"]);
        let reversed = cache_key("c", "s", &["graphs"], &["async", "rust"]);
        assert_eq!(a, b);
        assert_ne!(a, reversed);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn key_changes_when_topics_change() {
        let a = cache_key("s", "c", &["rust"], &["graphs"]);
        let b = cache_key("s", "c", &["rust", "wasm"], &["graphs"]);
        assert_ne!(a, b);
    }

    #[test]
    fn entries_expire_at_ttl() {
        let cache = InMemoryArbitrationCache::default();
        let t0 = Utc::now();
        cache.put_at("k".into(), verdict(), t0);

        let almost = t0 + chrono::Duration::hours(24) - chrono::Duration::seconds(1);
        assert!(cache.get_at("k", almost).is_some());
        assert!(cache.get_at("k", t0 + chrono::Duration::hours(24)).is_none());

        assert_eq!(cache.sweep_at(almost), 0);
        assert_eq!(cache.sweep_at(t0 + chrono::Duration::hours(25)), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_expired_entries() {
        let cache = Arc::new(InMemoryArbitrationCache::new(chrono::Duration::zero()));
        cache.put("k".into(), verdict());
        assert_eq!(cache.len(), 1);

        let handle = spawn_cache_sweeper(cache.clone(), Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        assert!(cache.is_empty());
        handle.abort();
    }
}
