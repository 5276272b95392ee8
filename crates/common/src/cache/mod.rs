//! Query result caching
//!
//! Provides:
//! - A `CacheStore` trait with Redis and in-memory implementations
//! - TTL on every write
//! - `QueryCache`, a best-effort wrapper that turns store failures into misses
//! - Cache key builders

use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Key/value store with per-entry expiry
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a raw value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a raw value that expires after `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Delete a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;
}

/// Redis cache client
pub struct RedisCache {
    connection: RwLock<MultiplexedConnection>,
}

impl RedisCache {
    /// Connect to Redis
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| AppError::CacheUnavailable {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::CacheUnavailable {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection: RwLock::new(connection),
        })
    }

    /// Ping Redis to check connectivity
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.write().await;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| AppError::CacheUnavailable {
                message: format!("Redis ping failed: {}", e),
            })?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.write().await;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.write().await;
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.write().await;
        let deleted: i32 = conn.del(key).await?;
        Ok(deleted > 0)
    }
}

/// In-process store used when no Redis URL is configured
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
    capacity: usize,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of live (unexpired) entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        if entries.len() >= self.capacity && !entries.contains_key(key) {
            entries.retain(|_, (_, expires_at)| *expires_at > now);
            // Still full: evict the entry closest to expiry
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, (_, expires_at))| *expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }
}

/// Best-effort query cache: store errors degrade to a miss, never to a failure
#[derive(Clone)]
pub struct QueryCache {
    store: Arc<dyn CacheStore>,
    key_prefix: String,
    ttl: Duration,
}

impl QueryCache {
    pub fn new(store: Arc<dyn CacheStore>, key_prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
            ttl,
        }
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a cached payload; any store error is reported as a miss
    pub async fn get(&self, key: &str) -> Option<String> {
        let full_key = self.key(key);
        match self.store.get(&full_key).await {
            Ok(Some(value)) => {
                debug!(key = %full_key, "Cache hit");
                metrics::record_cache(true, "query");
                Some(value)
            }
            Ok(None) => {
                debug!(key = %full_key, "Cache miss");
                metrics::record_cache(false, "query");
                None
            }
            Err(e) => {
                warn!(key = %full_key, error = %e, "Cache read failed, treating as miss");
                metrics::record_cache(false, "query");
                None
            }
        }
    }

    /// Store a payload with the configured TTL; failures are logged and dropped
    pub async fn set(&self, key: &str, value: &str) {
        let full_key = self.key(key);
        match self.store.set(&full_key, value, self.ttl).await {
            Ok(()) => debug!(key = %full_key, ttl_secs = self.ttl.as_secs(), "Cache set"),
            Err(e) => warn!(key = %full_key, error = %e, "Failed to cache value, continuing without cache"),
        }
    }

    /// Remove a payload; failures are logged and dropped
    pub async fn invalidate(&self, key: &str) {
        let full_key = self.key(key);
        if let Err(e) = self.store.delete(&full_key).await {
            warn!(key = %full_key, error = %e, "Cache delete failed");
        }
    }
}

/// Cache key builder helpers
pub mod keys {
    use sha2::{Digest, Sha256};

    /// Trim and collapse internal whitespace so trivially different spellings share a key
    pub fn normalize_query(query: &str) -> String {
        query.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Build a query result cache key from (strategy, normalized query, top_k)
    pub fn query(strategy: &str, query: &str, top_k: usize) -> String {
        let digest = Sha256::digest(normalize_query(query).as_bytes());
        format!("query:{}:{}:{}", strategy, hex::encode(digest), top_k)
    }
}
