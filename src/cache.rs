//! Redis read-through cache with pattern-based invalidation on write.
//!
//! The cache is strictly optional: when no Redis URL is configured, or
//! the connection cannot be established, every operation degrades to a
//! no-op and reads fall through to Postgres. Runtime Redis errors are
//! logged and swallowed for the same reason.

use std::sync::atomic::{AtomicU64, Ordering};

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::CacheConfig;

/// Entities whose writes invalidate cached reads. Each entity maps to
/// the key patterns its mutations can stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEntity {
    Person,
    Farm,
    Document,
    Debt,
    Notification,
}

impl CacheEntity {
    pub fn patterns(&self) -> &'static [&'static str] {
        match self {
            CacheEntity::Person => &["people:*", "search:person:*", "stats:*"],
            CacheEntity::Farm => &["farms:*", "stats:*"],
            CacheEntity::Document => &["documents:*", "stats:*"],
            CacheEntity::Debt => &["debts:*", "search:person:*", "stats:*"],
            CacheEntity::Notification => &["notifications:*"],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub invalidated_keys: u64,
    /// Redis operations that failed and were degraded to a no-op.
    pub errors: u64,
    pub enabled: bool,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    invalidated_keys: AtomicU64,
    errors: AtomicU64,
}

pub struct Cache {
    manager: Option<ConnectionManager>,
    prefix: String,
    default_ttl_secs: u64,
    counters: Counters,
}

impl Cache {
    /// Connect per config. Connection failure disables the cache rather
    /// than failing startup.
    pub async fn connect(config: &CacheConfig) -> Self {
        let manager = match &config.url {
            None => None,
            Some(url) => match redis::Client::open(url.as_str()) {
                Err(e) => {
                    warn!(error = %e, "invalid redis url, cache disabled");
                    None
                }
                Ok(client) => match ConnectionManager::new(client).await {
                    Ok(manager) => Some(manager),
                    Err(e) => {
                        warn!(error = %e, "redis unreachable, cache disabled");
                        None
                    }
                },
            },
        };
        Self {
            manager,
            prefix: config.key_prefix.clone(),
            default_ttl_secs: config.default_ttl_secs,
            counters: Counters::default(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            manager: None,
            prefix: String::new(),
            default_ttl_secs: 0,
            counters: Counters::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.manager.is_some()
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Cache key for a person search. The term is lowercased so lookups
    /// are case-insensitive.
    pub fn person_search_key(term: &str, page: i64, limit: i64) -> String {
        format!("search:person:{}:{}:{}", term.to_lowercase(), page, limit)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.manager.clone()?;
        let raw: Option<String> = match conn.get(self.full_key(key)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "cache read failed");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        match raw {
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    Some(value)
                }
                Err(e) => {
                    warn!(key, error = %e, "cache entry undecodable, treating as miss");
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: Option<u64>) {
        let Some(mut conn) = self.manager.clone() else {
            return;
        };
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "cache serialization failed");
                return;
            }
        };
        let ttl = ttl_secs.unwrap_or(self.default_ttl_secs);
        if let Err(e) = conn.set_ex::<_, _, ()>(self.full_key(key), raw, ttl).await {
            warn!(key, error = %e, "cache write failed");
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
    }

    /// Delete every key matching `pattern` (prefix applied). Returns the
    /// number of keys removed.
    pub async fn clear_pattern(&self, pattern: &str) -> u64 {
        let Some(mut conn) = self.manager.clone() else {
            return 0;
        };
        let full_pattern = self.full_key(pattern);
        let keys: Vec<String> = {
            let mut iter = match conn.scan_match::<_, String>(&full_pattern).await {
                Ok(iter) => iter,
                Err(e) => {
                    warn!(pattern, error = %e, "cache scan failed");
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    return 0;
                }
            };
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };
        if keys.is_empty() {
            return 0;
        }
        let count = keys.len() as u64;
        if let Err(e) = conn.del::<_, ()>(keys).await {
            warn!(pattern, error = %e, "cache delete failed");
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            return 0;
        }
        self.counters
            .invalidated_keys
            .fetch_add(count, Ordering::Relaxed);
        debug!(pattern, count, "cache invalidated");
        count
    }

    /// Invalidate everything a write to `entity` can stale.
    pub async fn invalidate(&self, entity: CacheEntity) -> u64 {
        let mut total = 0;
        for pattern in entity.patterns() {
            total += self.clear_pattern(pattern).await;
        }
        total
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            invalidated_keys: self.counters.invalidated_keys.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            enabled: self.is_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Cache, CacheEntity};

    #[test]
    fn search_key_is_case_insensitive() {
        assert_eq!(
            Cache::person_search_key("JoÃo", 1, 20),
            Cache::person_search_key("joão", 1, 20)
        );
        assert_eq!(Cache::person_search_key("silva", 2, 50), "search:person:silva:2:50");
    }

    #[test]
    fn person_writes_invalidate_search_results() {
        assert!(CacheEntity::Person.patterns().contains(&"search:person:*"));
        assert!(CacheEntity::Debt.patterns().contains(&"search:person:*"));
    }

    #[tokio::test]
    async fn disabled_cache_degrades_to_noops() {
        let cache = Cache::disabled();
        assert!(!cache.is_enabled());
        assert_eq!(cache.get_json::<Vec<String>>("people:all").await, None);
        cache.set_json("people:all", &vec!["x"], None).await;
        assert_eq!(cache.clear_pattern("people:*").await, 0);
        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses + stats.sets, 0);
        // Disabled-mode no-ops are not backend failures.
        assert_eq!(stats.errors, 0);
    }
}
