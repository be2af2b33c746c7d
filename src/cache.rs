//! Query Cache
//!
//! Process-local, time-bounded memoization in front of read-heavy aggregate
//! queries. A read-through accelerator, never a source of truth: expired
//! entries are purged lazily on the next lookup of the same key, and writers
//! invalidate by key prefix.
//!
//! Constructed once per process and injected into the components that need
//! it, so tests can swap in a disabled instance.

use crate::error::Result;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};

/// One memoized value
#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    stored_at: Instant,
}

/// Concurrent TTL cache with prefix invalidation
#[derive(Debug)]
pub struct QueryCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    enabled: bool,
}

impl QueryCache {
    /// Cache with the given time-to-live
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            enabled: true,
        }
    }

    /// Pass-through cache that never stores anything
    pub fn disabled() -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::ZERO,
            enabled: false,
        }
    }

    /// Return the cached value if fresh, else compute, store, and return it
    ///
    /// No negative caching: a failed `compute` stores nothing.
    pub fn get_or_compute<T, F>(&self, key: &str, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        if self.enabled {
            if let Some(entry) = self.entries.get(key) {
                if entry.stored_at.elapsed() < self.ttl {
                    tracing::debug!(key, "cache hit");
                    return Ok(serde_json::from_value(entry.value.clone())?);
                }
            }
        }

        let value = compute()?;

        if self.enabled {
            self.entries.insert(
                key.to_string(),
                CacheEntry {
                    value: serde_json::to_value(&value)?,
                    stored_at: Instant::now(),
                },
            );
        }

        Ok(value)
    }

    /// Remove every entry whose key starts with the prefix
    pub fn invalidate_prefix(&self, prefix: &str) {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(prefix, removed, "cache invalidated");
        }
    }

    /// Number of stored entries (fresh or expired)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are stored
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
