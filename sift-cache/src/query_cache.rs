use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 100;
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Trim, lowercase and collapse internal whitespace.
pub fn normalize_question(question: &str) -> String {
    question
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// `"{dataset_id}:{sha256(normalized question)}"`.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(dataset_id: &str, question: &str) -> Self {
        let digest = Sha256::digest(normalize_question(question).as_bytes());
        Self(format!("{dataset_id}:{digest:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when this key was built for exactly `dataset_id`.
    pub fn belongs_to(&self, dataset_id: &str) -> bool {
        self.0
            .strip_prefix(dataset_id)
            .and_then(|rest| rest.strip_prefix(':'))
            .is_some_and(|digest| !digest.contains(':'))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Swappable store for analysis results.
#[async_trait]
pub trait ResultCache<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Live entry for `key`. Expired entries are removed on the way out.
    async fn get(&self, key: &CacheKey) -> Option<V>;
    async fn set(&self, key: CacheKey, value: V, ttl: Duration);
    /// Drop every entry of `dataset_id`; returns how many were removed.
    async fn invalidate_dataset(&self, dataset_id: &str) -> usize;
    async fn len(&self) -> usize;
}

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) >= self.ttl
    }
}

/// Bounded in-process cache with LRU eviction and lazy TTL expiry.
pub struct InMemoryQueryCache<V> {
    entries: Mutex<LruCache<CacheKey, CacheEntry<V>>>,
}

impl<V> InMemoryQueryCache<V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl<V> Default for InMemoryQueryCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl<V> ResultCache<V> for InMemoryQueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &CacheKey) -> Option<V> {
        let mut entries = self.entries.lock().await;
        let expired = entries.peek(key)?.is_expired(Instant::now());
        if expired {
            entries.pop(key);
            debug!(target: "cache", %key, "entry expired");
            return None;
        }
        debug!(target: "cache", %key, "hit");
        entries.get(key).map(|entry| entry.value.clone())
    }

    async fn set(&self, key: CacheKey, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
            ttl,
        };
        let mut entries = self.entries.lock().await;
        if let Some((evicted, _)) = entries.push(key.clone(), entry) {
            if evicted != key {
                debug!(target: "cache", key = %evicted, "evicted least recently used entry");
            }
        }
    }

    async fn invalidate_dataset(&self, dataset_id: &str) -> usize {
        let mut entries = self.entries.lock().await;
        let doomed: Vec<CacheKey> = entries
            .iter()
            .filter(|(key, _)| key.belongs_to(dataset_id))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        debug!(target: "cache", dataset_id, removed = doomed.len(), "dataset invalidated");
        doomed.len()
    }

    async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn questions_normalize_before_hashing() {
        assert_eq!(
            CacheKey::new("ds1", "  Total   Revenue\tby REGION "),
            CacheKey::new("ds1", "total revenue by region")
        );
        assert_ne!(CacheKey::new("ds1", "q"), CacheKey::new("ds2", "q"));
        assert!(CacheKey::new("ds1", "q").as_str().starts_with("ds1:"));
    }

    #[test]
    fn dataset_membership_is_exact() {
        let key = CacheKey::new("ds1", "q");
        assert!(key.belongs_to("ds1"));
        assert!(!key.belongs_to("ds"));
        assert!(!CacheKey::new("ds10", "q").belongs_to("ds1"));
        assert!(!CacheKey::new("ds1:x", "q").belongs_to("ds1"));
    }

    #[tokio::test(start_paused = true)]
    async fn round_trip_then_expire() {
        let cache = InMemoryQueryCache::new(10);
        let key = CacheKey::new("ds1", "revenue");

        cache.set(key.clone(), 42u32, Duration::from_secs(60)).await;
        assert_eq!(cache.get(&key).await, Some(42));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get(&key).await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn least_recently_used_is_evicted_at_capacity() {
        let cache = InMemoryQueryCache::new(2);
        let (a, b, c) = (
            CacheKey::new("ds", "a"),
            CacheKey::new("ds", "b"),
            CacheKey::new("ds", "c"),
        );
        cache.set(a.clone(), "a", DEFAULT_TTL).await;
        cache.set(b.clone(), "b", DEFAULT_TTL).await;
        assert_eq!(cache.get(&a).await, Some("a"));

        cache.set(c.clone(), "c", DEFAULT_TTL).await;
        assert_eq!(cache.get(&b).await, None);
        assert_eq!(cache.get(&a).await, Some("a"));
        assert_eq!(cache.get(&c).await, Some("c"));
    }

    #[tokio::test]
    async fn invalidation_is_scoped_to_one_dataset() {
        let cache = InMemoryQueryCache::default();
        cache.set(CacheKey::new("ds1", "a"), 1, DEFAULT_TTL).await;
        cache.set(CacheKey::new("ds1", "b"), 2, DEFAULT_TTL).await;
        cache.set(CacheKey::new("ds10", "a"), 3, DEFAULT_TTL).await;

        assert_eq!(cache.invalidate_dataset("ds1").await, 2);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get(&CacheKey::new("ds10", "a")).await, Some(3));
    }
}
