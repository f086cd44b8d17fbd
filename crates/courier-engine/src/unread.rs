//! In-process cache for unread-index queries.
//!
//! Caching unread listings shaves the hot read path (badge counts are
//! fetched far more often than messages change). The backend is a bounded
//! in-process map rather than an external cache server: entries are small,
//! correctness tolerates a short staleness window, and invalidation happens
//! on the same process that writes.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `UNREAD_CACHE_ENABLED`: set to "false" to disable caching (default: true)
//! - `UNREAD_CACHE_TTL`: TTL in seconds (default: 30)
//! - `UNREAD_CACHE_CAPACITY`: max entries before oldest-first eviction
//!   (default: 1024)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_core::defaults::{UNREAD_CACHE_CAPACITY, UNREAD_CACHE_TTL_SECS};

/// Bounded TTL cache for unread query results.
#[derive(Clone)]
pub struct UnreadIndex {
    inner: Arc<UnreadIndexInner>,
}

struct UnreadIndexInner {
    entries: RwLock<HashMap<String, CacheEntry>>,
    // Per-user invalidation counters plus a global epoch. A fill that read
    // the store before an invalidation carries a stale generation and is
    // refused, so a purge can never be undone by an in-flight refill.
    generations: RwLock<HashMap<Uuid, u64>>,
    epoch: AtomicU64,
    ttl: Duration,
    capacity: usize,
    enabled: bool,
    stats: RwLock<CacheStats>,
}

struct CacheEntry {
    value: String,
    user_id: Uuid,
    generation: u64,
    inserted_at: Instant,
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub evictions: u64,
}

impl UnreadIndex {
    /// Create a new unread cache from environment configuration.
    pub fn from_env() -> Self {
        let enabled = std::env::var("UNREAD_CACHE_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let ttl_seconds: u64 = std::env::var("UNREAD_CACHE_TTL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(UNREAD_CACHE_TTL_SECS);

        let capacity: usize = std::env::var("UNREAD_CACHE_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(UNREAD_CACHE_CAPACITY);

        if enabled {
            info!(
                "unread cache enabled (TTL: {}s, capacity: {})",
                ttl_seconds, capacity
            );
        } else {
            info!("unread cache disabled via UNREAD_CACHE_ENABLED=false");
        }

        Self::with_settings(enabled, Duration::from_secs(ttl_seconds), capacity)
    }

    /// Create a disabled cache (for testing or tools that bypass caching).
    pub fn disabled() -> Self {
        Self::with_settings(false, Duration::from_secs(UNREAD_CACHE_TTL_SECS), 0)
    }

    fn with_settings(enabled: bool, ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Arc::new(UnreadIndexInner {
                entries: RwLock::new(HashMap::new()),
                generations: RwLock::new(HashMap::new()),
                epoch: AtomicU64::new(0),
                ttl,
                capacity,
                enabled,
                stats: RwLock::new(CacheStats::default()),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    /// Generate a cache key for an unread query.
    ///
    /// `scope` distinguishes the query shape (listing, count, per-partner);
    /// `partner` is hashed in when present so direct-conversation lookups
    /// get their own entries.
    pub fn cache_key(&self, scope: &str, user_id: Uuid, partner: Option<Uuid>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(scope.as_bytes());
        hasher.update(user_id.as_bytes());
        if let Some(p) = partner {
            hasher.update(p.as_bytes());
        }
        let hash = hex::encode(hasher.finalize());
        format!("unread:{}", &hash[..16])
    }

    /// Current invalidation generation for a user.
    ///
    /// Callers snapshot this before querying the store and hand it back to
    /// [`set`](Self::set) with the result; any invalidation in between moves
    /// the generation and the stale fill is dropped.
    pub async fn generation(&self, user_id: Uuid) -> u64 {
        let per_user = self
            .inner
            .generations
            .read()
            .await
            .get(&user_id)
            .copied()
            .unwrap_or(0);
        self.inner.epoch.load(Ordering::Acquire) + per_user
    }

    /// Get a cached result, if present and fresh.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.inner.enabled {
            return None;
        }

        let entries = self.inner.entries.read().await;
        let (value, user_id, generation) = match entries.get(key) {
            Some(e) if e.inserted_at.elapsed() < self.inner.ttl => {
                (e.value.clone(), e.user_id, e.generation)
            }
            _ => {
                drop(entries);
                debug!("cache MISS: {}", key);
                self.inner.stats.write().await.misses += 1;
                return None;
            }
        };
        drop(entries);

        // An entry written by a fill that raced an invalidation carries a
        // superseded generation; treat it as a miss.
        if generation != self.generation(user_id).await {
            debug!("cache MISS (superseded): {}", key);
            self.inner.stats.write().await.misses += 1;
            return None;
        }

        match serde_json::from_str(&value) {
            Ok(value) => {
                debug!("cache HIT: {}", key);
                self.inner.stats.write().await.hits += 1;
                Some(value)
            }
            Err(e) => {
                warn!("cache deserialization error: {}", e);
                self.inner.stats.write().await.errors += 1;
                None
            }
        }
    }

    /// Store a result, evicting the oldest entries when over capacity.
    ///
    /// `generation` is the value of [`generation`](Self::generation) taken
    /// before the store query that produced `value`. The fill is refused if
    /// the user has been invalidated since.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        user_id: Uuid,
        generation: u64,
        value: &T,
    ) -> bool {
        if !self.inner.enabled {
            return false;
        }
        if generation != self.generation(user_id).await {
            debug!("cache SKIP (superseded): {}", key);
            return false;
        }

        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                warn!("cache serialization error: {}", e);
                self.inner.stats.write().await.errors += 1;
                return false;
            }
        };

        let mut entries = self.inner.entries.write().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                value: serialized,
                user_id,
                generation,
                inserted_at: Instant::now(),
            },
        );

        let mut evicted = 0u64;
        while entries.len() > self.inner.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    entries.remove(&k);
                    evicted += 1;
                }
                None => break,
            }
        }
        drop(entries);

        if evicted > 0 {
            self.inner.stats.write().await.evictions += evicted;
        }
        true
    }

    /// Drop every cached entry belonging to a user.
    ///
    /// Called after any write that could change what the user has unread:
    /// a new message in one of their conversations, a mark-read, a deletion.
    pub async fn invalidate_user(&self, user_id: Uuid) -> usize {
        if !self.inner.enabled {
            return 0;
        }
        *self
            .inner
            .generations
            .write()
            .await
            .entry(user_id)
            .or_insert(0) += 1;
        let mut entries = self.inner.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.user_id != user_id);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("cache INVALIDATE: {} entries for user {}", removed, user_id);
        }
        removed
    }

    /// Drop all cached entries.
    pub async fn invalidate_all(&self) {
        if !self.inner.enabled {
            return;
        }
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        let mut entries = self.inner.entries.write().await;
        let removed = entries.len();
        entries.clear();
        if removed > 0 {
            info!("cache FLUSH: removed {} entries", removed);
        }
    }

    /// Snapshot of hit/miss/error/eviction counters.
    pub async fn stats(&self) -> CacheStats {
        self.inner.stats.read().await.clone()
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }
}
