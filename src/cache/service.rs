//! # Cache Service
//!
//! Cache-aside store for stage outputs. Redis is the preferred shared
//! primary; a process-local map is the degraded substitute. The local map is
//! populated on every write regardless of whether the Redis write succeeded,
//! and is served whenever the primary is marked unavailable.
//!
//! Availability is flipped by a background connection supervisor, never by
//! the hot path: `get`/`set` consult an atomic flag and treat a per-call
//! Redis error as a fallback-to-local event, not a health verdict.

use parking_lot::Mutex;
use redis::AsyncCommands;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Locally held entry with its own expiry, independent of Redis TTL
#[derive(Debug, Clone)]
struct LocalEntry {
    value: String,
    expires_at: Instant,
}

/// Health snapshot for operator visibility
#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    /// `healthy` when the primary is reachable, `degraded` otherwise
    pub status: &'static str,
    pub primary_available: bool,
    pub local_entries: usize,
}

/// Shared cache with Redis primary and process-local fallback.
#[derive(Clone)]
pub struct CacheService {
    redis: Option<redis::aio::ConnectionManager>,
    primary_available: Arc<AtomicBool>,
    local: Arc<Mutex<HashMap<String, LocalEntry>>>,
    default_ttl: Duration,
}

impl CacheService {
    /// Connect to the Redis primary. Connection failure is not fatal: the
    /// service starts degraded and the supervisor keeps probing.
    pub async fn connect(redis_url: &str, default_ttl: Duration) -> Self {
        let redis = match redis::Client::open(redis_url) {
            Ok(client) => match redis::aio::ConnectionManager::new(client).await {
                Ok(manager) => {
                    info!(url = %redis_url, "✅ Cache primary connected");
                    Some(manager)
                }
                Err(e) => {
                    warn!(url = %redis_url, error = %e, "Cache primary unreachable, starting degraded");
                    None
                }
            },
            Err(e) => {
                warn!(url = %redis_url, error = %e, "Invalid cache URL, local cache only");
                None
            }
        };

        let available = redis.is_some();
        Self {
            redis,
            primary_available: Arc::new(AtomicBool::new(available)),
            local: Arc::new(Mutex::new(HashMap::new())),
            default_ttl,
        }
    }

    /// Cache with no primary at all; everything lives in the local map.
    /// Used by tests and single-process deployments.
    pub fn local_only(default_ttl: Duration) -> Self {
        Self {
            redis: None,
            primary_available: Arc::new(AtomicBool::new(false)),
            local: Arc::new(Mutex::new(HashMap::new())),
            default_ttl,
        }
    }

    /// Default TTL applied when the caller does not specify one
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn primary_available(&self) -> bool {
        self.primary_available.load(Ordering::Acquire)
    }

    /// Look up a value. Primary first while it is marked available; the local
    /// substitute serves degraded reads and per-call primary errors.
    pub async fn get(&self, key: &str) -> Option<String> {
        if self.primary_available() {
            if let Some(manager) = &self.redis {
                let mut conn = manager.clone();
                match conn.get::<_, Option<String>>(key).await {
                    Ok(value) => return value,
                    Err(e) => {
                        warn!(key = %key, error = %e, "Cache primary read failed, serving local");
                        return self.local_get(key);
                    }
                }
            }
        }
        self.local_get(key)
    }

    /// Store a value with the given TTL. The local substitute is written on
    /// every call, whatever the primary's outcome.
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) {
        if self.primary_available() {
            if let Some(manager) = &self.redis {
                let mut conn = manager.clone();
                if let Err(e) = conn
                    .set_ex::<_, _, ()>(key, value, ttl.as_secs())
                    .await
                {
                    warn!(key = %key, error = %e, "Cache primary write failed");
                }
            }
        }

        self.local.lock().insert(
            key.to_string(),
            LocalEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Remove a key from both tiers
    pub async fn delete(&self, key: &str) {
        if self.primary_available() {
            if let Some(manager) = &self.redis {
                let mut conn = manager.clone();
                if let Err(e) = conn.del::<_, ()>(key).await {
                    warn!(key = %key, error = %e, "Cache primary delete failed");
                }
            }
        }
        self.local.lock().remove(key);
    }

    fn local_get(&self, key: &str) -> Option<String> {
        let mut local = self.local.lock();
        match local.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                local.remove(key);
                None
            }
            None => None,
        }
    }

    /// Drop expired local entries. Public so tests can drive eviction.
    pub fn evict_expired(&self) -> usize {
        let mut local = self.local.lock();
        let before = local.len();
        let now = Instant::now();
        local.retain(|_, entry| entry.expires_at > now);
        before - local.len()
    }

    /// Spawn the scheduled eviction sweep for the local substitute.
    pub fn spawn_eviction(
        &self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cache = self.clone();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = cache.evict_expired();
                        if evicted > 0 {
                            debug!(evicted, "🧹 Evicted expired local cache entries");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Spawn the connection supervisor that flips primary availability on
    /// connect/error events. Without a configured primary this is a no-op
    /// task that exits immediately.
    pub fn spawn_health_monitor(
        &self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let Some(manager) = self.redis.clone() else {
            return tokio::spawn(async {});
        };
        let available = Arc::clone(&self.primary_available);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut conn = manager.clone();
                        let pong: redis::RedisResult<String> =
                            redis::cmd("PING").query_async(&mut conn).await;
                        let alive = pong.is_ok();
                        let was_alive = available.swap(alive, Ordering::Release);
                        if alive && !was_alive {
                            info!("✅ Cache primary reconnected");
                        } else if !alive && was_alive {
                            warn!("Cache primary lost, falling back to local cache");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Health snapshot for logs and operator tooling
    pub fn health(&self) -> CacheHealth {
        let primary_available = self.primary_available();
        CacheHealth {
            status: if primary_available { "healthy" } else { "degraded" },
            primary_available,
            local_entries: self.local.lock().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn set_then_get_within_ttl_returns_value() {
        let cache = CacheService::local_only(Duration::from_secs(60));
        cache.set("k1", "v1", Duration::from_secs(60)).await;
        assert_eq!(cache.get("k1").await.as_deref(), Some("v1"));
        assert_eq!(cache.health().status, "degraded");
        assert_eq!(cache.health().local_entries, 1);
    }

    #[tokio::test]
    async fn expired_entries_are_not_served() {
        let cache = CacheService::local_only(Duration::from_secs(60));
        cache.set("k1", "v1", Duration::from_millis(20)).await;
        sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("k1").await, None);
    }

    #[tokio::test]
    async fn eviction_sweep_drops_only_expired_entries() {
        let cache = CacheService::local_only(Duration::from_secs(60));
        cache.set("short", "v", Duration::from_millis(10)).await;
        cache.set("long", "v", Duration::from_secs(60)).await;

        sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.get("long").await.as_deref(), Some("v"));
    }
}
