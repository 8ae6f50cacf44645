//! TTL cache at the host tag boundary.
//!
//! Stores the formatted value and quality a host last read for a tag,
//! keyed by `device/address`. Entries expire lazily on lookup; inserting
//! into a full cache drops the least recently used entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use tokio::time::Instant;
use tracing::trace;

use crate::types::QualityLevel;

/// Deadline used when a TTL reaches past what `Instant` can represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Tag cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCacheConfig {
    /// Maximum number of tags; 0 disables caching
    pub capacity: usize,
    /// Lifetime of entries inserted without an explicit TTL
    pub default_ttl: Duration,
}

impl Default for TagCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 5_000,
            default_ttl: Duration::from_secs(30),
        }
    }
}

/// Cached tag reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagValue {
    /// Formatted value
    pub value: String,
    /// Quality level
    pub quality: QualityLevel,
    /// When the tag was first cached
    pub created: DateTime<Utc>,
    /// When the value last changed
    pub updated: DateTime<Utc>,
}

/// Result of [`TagCache::lookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagLookup {
    /// Live entry
    Hit(TagValue),
    /// Nothing cached
    Miss,
    /// Entry outlived its TTL and was removed
    Expired,
}

impl TagLookup {
    /// The value on a hit.
    pub fn hit(self) -> Option<TagValue> {
        match self {
            Self::Hit(value) => Some(value),
            Self::Miss | Self::Expired => None,
        }
    }
}

#[derive(Debug)]
struct TagEntry {
    value: TagValue,
    expires_at: Instant,
    accessed_at: Instant,
}

/// Tag cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagCacheStats {
    /// Stored tags
    pub entries: usize,
    /// Live lookups
    pub hits: u64,
    /// Lookups of unknown tags
    pub misses: u64,
    /// Lookups that found an expired entry
    pub expired: u64,
    /// Entries dropped for capacity
    pub evictions: u64,
}

/// Bounded TTL cache of formatted tag readings.
#[derive(Debug, Default)]
pub struct TagCache {
    config: TagCacheConfig,
    entries: RwLock<HashMap<String, TagEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    evictions: AtomicU64,
}

impl TagCache {
    /// Create an empty cache.
    pub fn new(config: TagCacheConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Cache key for a device tag.
    pub fn key(device: &str, address: &str) -> String {
        format!("{device}/{address}")
    }

    /// Store a reading; `ttl` overrides the default lifetime.
    pub fn insert(&self, key: &str, value: String, quality: QualityLevel, ttl: Option<Duration>) {
        if self.config.capacity == 0 {
            return;
        }
        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let expires_at = now.checked_add(ttl).unwrap_or(now + FAR_FUTURE);
        let mut entries = self.entries.write();

        if let Some(entry) = entries.get_mut(key) {
            entry.value.value = value;
            entry.value.quality = quality;
            entry.value.updated = Utc::now();
            entry.expires_at = expires_at;
            entry.accessed_at = now;
            return;
        }

        if entries.len() >= self.config.capacity {
            let lru = entries
                .iter()
                .min_by_key(|(_, e)| e.accessed_at)
                .map(|(k, _)| k.clone());
            if let Some(lru) = lru {
                entries.remove(&lru);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                trace!(tag = %lru, "Evicted least recently used tag");
            }
        }

        let stamp = Utc::now();
        entries.insert(
            key.to_string(),
            TagEntry {
                value: TagValue {
                    value,
                    quality,
                    created: stamp,
                    updated: stamp,
                },
                expires_at,
                accessed_at: now,
            },
        );
    }

    /// Look a tag up, dropping it if expired.
    pub fn lookup(&self, key: &str) -> TagLookup {
        let now = Instant::now();
        let entries = self.entries.upgradable_read();
        let Some(entry) = entries.get(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return TagLookup::Miss;
        };
        let expired = now >= entry.expires_at;

        let mut entries = RwLockUpgradableReadGuard::upgrade(entries);
        if expired {
            entries.remove(key);
            self.expired.fetch_add(1, Ordering::Relaxed);
            return TagLookup::Expired;
        }
        match entries.get_mut(key) {
            Some(entry) => {
                entry.accessed_at = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                TagLookup::Hit(entry.value.clone())
            }
            None => TagLookup::Miss,
        }
    }

    /// Remove a tag.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Remove every tag of one device.
    pub fn remove_device(&self, device: &str) -> usize {
        let prefix = format!("{device}/");
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(&prefix));
        before - entries.len()
    }

    /// Drop every expired tag.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| now < e.expires_at);
        before - entries.len()
    }

    /// Number of stored tags, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Current statistics.
    pub fn stats(&self) -> TagCacheStats {
        TagCacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
