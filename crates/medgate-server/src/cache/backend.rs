//! Cache backend implementation with L1 (DashMap) and L2 (Redis) tiers.

use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cached entry with TTL support.
///
/// The data is wrapped in `Arc` to allow cheap cloning on cache hits.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<Vec<u8>>,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    pub fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data: Arc::new(data),
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Two-tier cache backend: L1 (DashMap) + L2 (Redis).
///
/// - **Local**: Single-instance mode using only DashMap
/// - **Redis**: Multi-instance mode with DashMap (L1) + Redis (L2)
#[derive(Clone)]
pub enum CacheBackend {
    /// Single-instance: local DashMap only
    Local(Arc<DashMap<String, CachedEntry>>),

    /// Multi-instance: Redis + local L1
    Redis {
        redis: Pool,
        local: Arc<DashMap<String, CachedEntry>>,
    },
}

impl CacheBackend {
    pub fn new_local() -> Self {
        CacheBackend::Local(Arc::new(DashMap::new()))
    }

    pub fn new_redis(redis_pool: Pool) -> Self {
        CacheBackend::Redis {
            redis: redis_pool,
            local: Arc::new(DashMap::new()),
        }
    }

    /// Get a value from the cache.
    ///
    /// Lookup order is L1 then L2. An L2 hit is promoted to L1 for the
    /// remaining Redis TTL. Redis errors are logged and reported as a miss.
    pub async fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        match self {
            CacheBackend::Local(map) => Self::get_local(map, key),
            CacheBackend::Redis { redis, local } => {
                if let Some(data) = Self::get_local(local, key) {
                    tracing::debug!(key = %key, "cache hit (L1)");
                    return Some(data);
                }

                let mut conn = match redis.get().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to get Redis connection");
                        return None;
                    }
                };

                let fetched: redis::RedisResult<(Option<Vec<u8>>, i64)> = redis::pipe()
                    .get(key)
                    .pttl(key)
                    .query_async(&mut conn)
                    .await;

                match fetched {
                    Ok((Some(data), pttl)) => {
                        tracing::debug!(key = %key, "cache hit (L2)");
                        let entry = CachedEntry::new(data, promotion_ttl(pttl));
                        let data = Arc::clone(&entry.data);
                        local.insert(key.to_string(), entry);
                        Some(data)
                    }
                    Ok((None, _)) => {
                        tracing::debug!(key = %key, "cache miss");
                        None
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Redis GET error");
                        None
                    }
                }
            }
        }
    }

    fn get_local(map: &DashMap<String, CachedEntry>, key: &str) -> Option<Arc<Vec<u8>>> {
        let hit = map.get(key).map(|entry| {
            if entry.is_expired() {
                None
            } else {
                Some(Arc::clone(&entry.data))
            }
        })?;
        if hit.is_none() {
            map.remove(key);
        }
        hit
    }

    /// Set a value in the cache with TTL.
    ///
    /// Redis writes are fire-and-forget; failures are logged.
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        match self {
            CacheBackend::Local(map) => {
                map.insert(key.to_string(), CachedEntry::new(value, ttl));
            }
            CacheBackend::Redis { redis, local } => {
                let entry = CachedEntry::new(value, ttl);
                let data_for_redis = Arc::clone(&entry.data);

                local.insert(key.to_string(), entry);

                let redis = redis.clone();
                let key = key.to_string();
                let ttl_secs = ttl.as_secs().max(1);
                tokio::spawn(async move {
                    match redis.get().await {
                        Ok(mut conn) => {
                            if let Err(e) = conn
                                .set_ex::<_, _, ()>(&key, &*data_for_redis, ttl_secs)
                                .await
                            {
                                tracing::warn!(key = %key, error = %e, "Redis SET error");
                            } else {
                                tracing::debug!(key = %key, ttl_secs = %ttl_secs, "cache set (L1+L2)");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(key = %key, error = %e, "Failed to get Redis connection");
                        }
                    }
                });
            }
        }
    }

    /// Invalidate a cache entry in every tier.
    pub async fn invalidate(&self, key: &str) {
        match self {
            CacheBackend::Local(map) => {
                map.remove(key);
                tracing::debug!(key = %key, "cache invalidated (local)");
            }
            CacheBackend::Redis { redis, local } => {
                local.remove(key);

                match redis.get().await {
                    Ok(mut conn) => {
                        if let Err(e) = conn.del::<_, ()>(key).await {
                            tracing::warn!(key = %key, error = %e, "Redis DEL error");
                        } else {
                            tracing::debug!(key = %key, "cache invalidated (L1+L2)");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Failed to get Redis connection");
                    }
                }
            }
        }
    }

    fn local_map(&self) -> &DashMap<String, CachedEntry> {
        match self {
            CacheBackend::Local(map) => map,
            CacheBackend::Redis { local, .. } => local,
        }
    }

    /// Drops expired L1 entries and returns how many were removed.
    ///
    /// Redis expires its own keys, so only the in-process tier is swept.
    pub fn purge_expired(&self) -> usize {
        let mut purged = 0;
        self.local_map().retain(|_, entry| {
            let keep = !entry.is_expired();
            if !keep {
                purged += 1;
            }
            keep
        });
        purged
    }

    /// Start background sweep of expired L1 entries.
    pub fn start_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged = purged, "Swept expired cache entries");
                }
            }
        })
    }

    /// Get cache statistics (L1 only).
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            l1_entries: self.local_map().len(),
            mode: match self {
                CacheBackend::Local(_) => "local",
                CacheBackend::Redis { .. } => "redis",
            },
        }
    }

    /// Check if Redis is available (for health checks).
    pub async fn is_redis_available(&self) -> bool {
        match self {
            CacheBackend::Local(_) => false,
            CacheBackend::Redis { redis, .. } => redis.get().await.is_ok(),
        }
    }
}

// PTTL is -1 for keys without expiry and -2 for missing keys.
fn promotion_ttl(pttl_ms: i64) -> Duration {
    u64::try_from(pttl_ms)
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(60))
}

/// Cache statistics, reported by `/readyz`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub l1_entries: usize,
    pub mode: &'static str,
}
