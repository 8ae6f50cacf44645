//! Per-device point cache.
//!
//! Holds the latest state of every information object seen from one
//! device, keyed by IOA, with a secondary index by type identifier.
//! Mutations take the write lock, scans take the read lock and point
//! lookups take an upgradable read that is promoted to bump access
//! statistics.

use std::collections::{HashMap, HashSet};
use std::mem::size_of;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{Iec104Error, Result};
use crate::mapping::{validate_ioa, DataType};
use crate::types::{DataPoint, DataValue, QualityFlags, QualityLevel, TypeId};
use crate::value::format_value;

/// Default maximum number of points per device.
pub const DEFAULT_MAX_POINTS: usize = 10_000;

/// Which entry makes room when the cache is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Fewest accesses, then oldest access
    #[default]
    LeastUsed,
    /// Oldest access
    LeastRecentlyAccessed,
    /// Oldest update
    OldestUpdate,
    /// Refuse new addresses with [`Iec104Error::CacheOverflow`]
    Reject,
}

impl EvictionPolicy {
    /// Pick the entry to drop. `Reject` orders like `LeastUsed` here, since
    /// explicit eviction still has to choose something.
    fn victim<'a, I>(self, entries: I) -> Option<u32>
    where
        I: Iterator<Item = &'a PointEntry>,
    {
        match self {
            Self::LeastUsed | Self::Reject => entries
                .min_by_key(|e| (e.access_count, e.accessed_at, e.ioa))
                .map(|e| e.ioa),
            Self::LeastRecentlyAccessed => entries
                .min_by_key(|e| (e.accessed_at, e.ioa))
                .map(|e| e.ioa),
            Self::OldestUpdate => entries
                .min_by_key(|e| (e.updated_at, e.ioa))
                .map(|e| e.ioa),
        }
    }
}

/// Point cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointCacheConfig {
    /// Maximum number of distinct addresses
    pub max_points: usize,
    /// Entries not updated within this window read as misses
    pub entry_ttl: Option<Duration>,
    /// Eviction policy when full
    pub eviction: EvictionPolicy,
}

impl Default for PointCacheConfig {
    fn default() -> Self {
        Self {
            max_points: DEFAULT_MAX_POINTS,
            entry_ttl: None,
            eviction: EvictionPolicy::default(),
        }
    }
}

/// Latest known state of one information object.
#[derive(Debug, Clone, PartialEq)]
pub struct PointEntry {
    /// Information object address
    pub ioa: u32,
    /// Type identifier of the last update
    pub type_id: TypeId,
    /// Host-facing data type, if the type carries data
    pub data_type: Option<DataType>,
    /// Decoded value
    pub value: DataValue,
    /// Quality descriptor
    pub quality: QualityFlags,
    /// Source time tag, or receive time when the unit carried none
    pub timestamp: DateTime<Utc>,
    /// First seen
    pub created_at: Instant,
    /// Last update
    pub updated_at: Instant,
    /// Last read (or creation)
    pub accessed_at: Instant,
    /// Updates since creation
    pub update_count: u64,
    /// Reads since creation
    pub access_count: u64,
}

impl PointEntry {
    fn new(point: DataPoint, now: Instant) -> Self {
        Self {
            ioa: point.ioa,
            type_id: point.type_id,
            data_type: DataType::from_type_id(point.type_id),
            value: point.value,
            quality: point.quality,
            timestamp: point.timestamp.unwrap_or_else(Utc::now),
            created_at: now,
            updated_at: now,
            accessed_at: now,
            update_count: 1,
            access_count: 0,
        }
    }

    fn overwrite(&mut self, point: DataPoint, now: Instant) {
        self.type_id = point.type_id;
        self.data_type = DataType::from_type_id(point.type_id);
        self.value = point.value;
        self.quality = point.quality;
        self.timestamp = point.timestamp.unwrap_or_else(Utc::now);
        self.updated_at = now;
        self.update_count += 1;
    }

    /// Three-level quality.
    #[inline]
    pub fn level(&self) -> QualityLevel {
        self.quality.level()
    }

    /// Value as host text; `"Invalid"` for invalid points.
    pub fn text(&self) -> String {
        format_value(&self.value, self.quality)
    }

    /// Time since the last update.
    pub fn age(&self) -> Duration {
        self.updated_at.elapsed()
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<u32, PointEntry>,
    by_type: HashMap<TypeId, HashSet<u32>>,
}

impl Inner {
    fn index(&mut self, type_id: TypeId, ioa: u32) {
        self.by_type.entry(type_id).or_default().insert(ioa);
    }

    fn unindex(&mut self, type_id: TypeId, ioa: u32) {
        if let Some(bucket) = self.by_type.get_mut(&type_id) {
            bucket.remove(&ioa);
            if bucket.is_empty() {
                self.by_type.remove(&type_id);
            }
        }
    }

    fn remove(&mut self, ioa: u32) -> Option<PointEntry> {
        let entry = self.entries.remove(&ioa)?;
        self.unindex(entry.type_id, ioa);
        Some(entry)
    }

    fn remove_where(&mut self, mut doomed: impl FnMut(&PointEntry) -> bool) -> usize {
        let ioas: Vec<u32> = self
            .entries
            .values()
            .filter(|e| doomed(e))
            .map(|e| e.ioa)
            .collect();
        for ioa in &ioas {
            self.remove(*ioa);
        }
        ioas.len()
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    updates: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Snapshot of cache statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCacheStats {
    /// Stored addresses
    pub entries: usize,
    /// Distinct type identifiers present
    pub type_buckets: usize,
    /// Lookups that found a live entry
    pub hits: u64,
    /// Lookups that found nothing or an expired entry
    pub misses: u64,
    /// Updates applied
    pub updates: u64,
    /// Entries evicted for capacity or by explicit eviction
    pub evictions: u64,
    /// Entries dropped because they outlived the TTL
    pub expirations: u64,
    /// `hits / (hits + misses)`, 0 when nothing was looked up
    pub hit_ratio: f64,
    /// Rough heap footprint in bytes
    pub memory_bytes: usize,
}

/// Latest-value store for one device.
#[derive(Debug, Default)]
pub struct PointCache {
    config: PointCacheConfig,
    inner: RwLock<Inner>,
    counters: Counters,
}

impl PointCache {
    /// Create an empty cache.
    pub fn new(config: PointCacheConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner::default()),
            counters: Counters::default(),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &PointCacheConfig {
        &self.config
    }

    fn is_expired(&self, entry: &PointEntry, now: Instant) -> bool {
        self.config
            .entry_ttl
            .is_some_and(|ttl| now.saturating_duration_since(entry.updated_at) > ttl)
    }

    /// Store a value for `ioa`.
    ///
    /// A new address in a full cache first evicts one entry according to
    /// the eviction policy. Update and access counters survive overwrites.
    pub fn update(
        &self,
        ioa: u32,
        type_id: TypeId,
        value: DataValue,
        quality: QualityFlags,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut point = DataPoint::new(ioa, type_id, value).with_quality(quality);
        point.timestamp = timestamp;
        self.store(point)
    }

    /// Store a decoded point.
    pub fn store(&self, point: DataPoint) -> Result<()> {
        validate_ioa(point.ioa)?;
        let mut inner = self.inner.write();
        self.apply(&mut inner, point, Instant::now())
    }

    /// Store several points under one write lock.
    ///
    /// Returns the points that were rejected together with the reason.
    pub fn update_batch<I>(&self, points: I) -> Vec<(u32, Iec104Error)>
    where
        I: IntoIterator<Item = DataPoint>,
    {
        let now = Instant::now();
        let mut rejected = Vec::new();
        let mut inner = self.inner.write();
        for point in points {
            let ioa = point.ioa;
            if let Err(e) = validate_ioa(ioa).and_then(|()| self.apply(&mut inner, point, now)) {
                rejected.push((ioa, e));
            }
        }
        rejected
    }

    fn apply(&self, inner: &mut Inner, point: DataPoint, now: Instant) -> Result<()> {
        let ioa = point.ioa;
        let new_type = point.type_id;

        if let Some(entry) = inner.entries.get_mut(&ioa) {
            let old_type = entry.type_id;
            entry.overwrite(point, now);
            if old_type != new_type {
                inner.unindex(old_type, ioa);
                inner.index(new_type, ioa);
            }
        } else {
            if inner.entries.len() >= self.config.max_points {
                self.make_room(inner)?;
            }
            inner.entries.insert(ioa, PointEntry::new(point, now));
            inner.index(new_type, ioa);
        }

        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        trace!(ioa, type_id = %new_type, "Point updated");
        Ok(())
    }

    fn make_room(&self, inner: &mut Inner) -> Result<()> {
        let overflow = Iec104Error::CacheOverflow {
            capacity: self.config.max_points,
        };
        if self.config.eviction == EvictionPolicy::Reject {
            return Err(overflow);
        }
        let victim = self
            .config
            .eviction
            .victim(inner.entries.values())
            .ok_or(overflow)?;
        inner.remove(victim);
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        debug!(ioa = victim, policy = ?self.config.eviction, "Evicted point to make room");
        Ok(())
    }

    /// Read an entry, counting the access.
    ///
    /// An entry past its TTL is removed and reported as a miss.
    pub fn get(&self, ioa: u32) -> Option<PointEntry> {
        let now = Instant::now();
        let inner = self.inner.upgradable_read();
        let expired = match inner.entries.get(&ioa) {
            Some(entry) => self.is_expired(entry, now),
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let mut inner = RwLockUpgradableReadGuard::upgrade(inner);
        if expired {
            inner.remove(ioa);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            trace!(ioa, "Expired point removed on read");
            return None;
        }

        let entry = inner.entries.get_mut(&ioa)?;
        entry.access_count += 1;
        entry.accessed_at = now;
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.clone())
    }

    /// Whether `ioa` is stored. Does not count as an access.
    pub fn contains(&self, ioa: u32) -> bool {
        self.inner.read().entries.contains_key(&ioa)
    }

    /// Remove one entry.
    pub fn remove(&self, ioa: u32) -> Option<PointEntry> {
        self.inner.write().remove(ioa)
    }

    /// All entries of one type identifier, ordered by IOA.
    pub fn by_type(&self, type_id: TypeId) -> Vec<PointEntry> {
        let inner = self.inner.read();
        let mut out: Vec<PointEntry> = inner
            .by_type
            .get(&type_id)
            .into_iter()
            .flatten()
            .filter_map(|ioa| inner.entries.get(ioa).cloned())
            .collect();
        out.sort_by_key(|e| e.ioa);
        out
    }

    /// Entries whose address falls in `range`, ordered by IOA.
    pub fn range(&self, range: RangeInclusive<u32>) -> Vec<PointEntry> {
        self.scan(|e| range.contains(&e.ioa))
    }

    /// Entries at the given quality level, ordered by IOA.
    pub fn by_quality(&self, level: QualityLevel) -> Vec<PointEntry> {
        self.scan(|e| e.level() == level)
    }

    /// Every entry, ordered by IOA.
    pub fn snapshot(&self) -> Vec<PointEntry> {
        self.scan(|_| true)
    }

    fn scan(&self, keep: impl Fn(&PointEntry) -> bool) -> Vec<PointEntry> {
        let mut out: Vec<PointEntry> = self
            .inner
            .read()
            .entries
            .values()
            .filter(|e| keep(e))
            .cloned()
            .collect();
        out.sort_by_key(|e| e.ioa);
        out
    }

    /// Drop entries not updated within `max_age`.
    pub fn remove_older_than(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let removed = self
            .inner
            .write()
            .remove_where(|e| now.saturating_duration_since(e.updated_at) > max_age);
        if removed > 0 {
            debug!(removed, ?max_age, "Removed stale points");
        }
        removed
    }

    /// Drop entries at the given quality level.
    pub fn remove_by_quality(&self, level: QualityLevel) -> usize {
        self.inner.write().remove_where(|e| e.level() == level)
    }

    /// Drop entries past the configured TTL.
    pub fn remove_expired(&self) -> usize {
        if self.config.entry_ttl.is_none() {
            return 0;
        }
        let now = Instant::now();
        let removed = self.inner.write().remove_where(|e| self.is_expired(e, now));
        self.counters
            .expirations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Evict up to `count` entries in eviction-policy order.
    pub fn evict(&self, count: usize) -> usize {
        let mut inner = self.inner.write();
        let mut evicted = 0;
        while evicted < count {
            let Some(victim) = self.config.eviction.victim(inner.entries.values()) else {
                break;
            };
            inner.remove(victim);
            evicted += 1;
        }
        self.counters
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    /// Number of stored addresses.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. Statistics are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.by_type.clear();
    }

    /// Current statistics.
    pub fn stats(&self) -> PointCacheStats {
        let inner = self.inner.read();
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let indexed: usize = inner.by_type.values().map(HashSet::len).sum();

        PointCacheStats {
            entries: inner.entries.len(),
            type_buckets: inner.by_type.len(),
            hits,
            misses,
            updates: self.counters.updates.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            hit_ratio: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            memory_bytes: inner.entries.len() * (size_of::<u32>() + size_of::<PointEntry>())
                + indexed * size_of::<u32>()
                + inner.by_type.len() * size_of::<(TypeId, HashSet<u32>)>(),
        }
    }

    #[cfg(test)]
    fn index_is_consistent(&self) -> bool {
        let inner = self.inner.read();
        let indexed: usize = inner.by_type.values().map(HashSet::len).sum();
        indexed == inner.entries.len()
            && inner.entries.values().all(|e| {
                inner
                    .by_type
                    .get(&e.type_id)
                    .is_some_and(|bucket| bucket.contains(&e.ioa))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Ioa;

    fn cache(max_points: usize) -> PointCache {
        PointCache::new(PointCacheConfig {
            max_points,
            ..Default::default()
        })
    }

    fn put(cache: &PointCache, ioa: u32, value: f32) {
        cache
            .update(ioa, TypeId::MeasuredFloat, DataValue::Float(value), QualityFlags::GOOD, None)
            .unwrap();
    }

    // ==================== Update / Get ====================

    #[test]
    fn test_update_then_get() {
        let cache = cache(10);
        put(&cache, 100, 1.5);

        let entry = cache.get(100).unwrap();
        assert_eq!(entry.value, DataValue::Float(1.5));
        assert_eq!(entry.data_type, Some(DataType::MeasuredFloat));
        assert_eq!(entry.text(), "1.500000");
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.update_count, 1);
    }

    #[test]
    fn test_miss_is_not_an_error() {
        let cache = cache(10);
        assert!(cache.get(5).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_counters_survive_overwrite() {
        let cache = cache(10);
        put(&cache, 1, 1.0);
        cache.get(1);
        cache.get(1);
        put(&cache, 1, 2.0);

        let entry = cache.get(1).unwrap();
        assert_eq!(entry.value, DataValue::Float(2.0));
        assert_eq!(entry.update_count, 2);
        assert_eq!(entry.access_count, 3);
    }

    #[test]
    fn test_invalid_address_rejected() {
        let cache = cache(10);
        for ioa in [0, Ioa::MAX + 1] {
            let err = cache
                .update(ioa, TypeId::SinglePoint, DataValue::Single(true), QualityFlags::GOOD, None)
                .unwrap_err();
            assert!(matches!(err, Iec104Error::InvalidAddress(_)));
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn test_source_timestamp_kept() {
        let cache = cache(10);
        let ts = DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        cache
            .update(7, TypeId::SinglePointTime56, DataValue::Single(false), QualityFlags::GOOD, Some(ts))
            .unwrap();
        assert_eq!(cache.get(7).unwrap().timestamp, ts);
    }

    // ==================== Type index ====================

    #[test]
    fn test_type_index_follows_retype() {
        let cache = cache(10);
        put(&cache, 1, 1.0);
        put(&cache, 2, 2.0);
        cache
            .update(2, TypeId::MeasuredScaled, DataValue::Scaled(5), QualityFlags::GOOD, None)
            .unwrap();

        let floats: Vec<_> = cache.by_type(TypeId::MeasuredFloat).iter().map(|e| e.ioa).collect();
        let scaled: Vec<_> = cache.by_type(TypeId::MeasuredScaled).iter().map(|e| e.ioa).collect();
        assert_eq!(floats, [1]);
        assert_eq!(scaled, [2]);
        assert!(cache.index_is_consistent());

        cache.remove(1);
        assert!(cache.by_type(TypeId::MeasuredFloat).is_empty());
        assert_eq!(cache.stats().type_buckets, 1);
        assert!(cache.index_is_consistent());
    }

    #[test]
    fn test_batch_update_reports_rejects() {
        let cache = cache(10);
        let points = vec![
            DataPoint::new(1, TypeId::SinglePoint, DataValue::Single(true)),
            DataPoint::new(0, TypeId::SinglePoint, DataValue::Single(true)),
            DataPoint::new(2, TypeId::SinglePoint, DataValue::Single(false)),
        ];
        let rejected = cache.update_batch(points);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, 0);
        assert_eq!(cache.len(), 2);
        assert!(cache.index_is_consistent());
    }

    // ==================== Eviction ====================

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_evicts_least_used() {
        let cache = cache(3);
        put(&cache, 1, 1.0);
        put(&cache, 2, 2.0);
        put(&cache, 3, 3.0);

        cache.get(1);
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.get(3);
        cache.get(3);
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.get(2);

        // 1 and 2 both have one access; 1 was read earlier
        put(&cache, 4, 4.0);

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(1));
        assert!(cache.contains(2) && cache.contains(3) && cache.contains(4));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_when_full_does_not_evict() {
        let cache = cache(2);
        put(&cache, 1, 1.0);
        put(&cache, 2, 2.0);
        put(&cache, 2, 3.0);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oldest_update_policy() {
        let cache = PointCache::new(PointCacheConfig {
            max_points: 2,
            eviction: EvictionPolicy::OldestUpdate,
            ..Default::default()
        });
        put(&cache, 1, 1.0);
        tokio::time::advance(Duration::from_secs(1)).await;
        put(&cache, 2, 2.0);
        tokio::time::advance(Duration::from_secs(1)).await;
        put(&cache, 1, 1.5);

        put(&cache, 3, 3.0);
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
    }

    #[test]
    fn test_reject_policy_overflows() {
        let cache = PointCache::new(PointCacheConfig {
            max_points: 1,
            eviction: EvictionPolicy::Reject,
            ..Default::default()
        });
        put(&cache, 1, 1.0);
        let err = cache
            .update(2, TypeId::MeasuredFloat, DataValue::Float(0.0), QualityFlags::GOOD, None)
            .unwrap_err();
        assert!(matches!(err, Iec104Error::CacheOverflow { capacity: 1 }));
        assert_eq!(err.code(), 6001);
    }

    #[test]
    fn test_explicit_evict() {
        let cache = cache(10);
        for ioa in 1..=5 {
            put(&cache, ioa, 0.0);
        }
        assert_eq!(cache.evict(2), 2);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.evict(10), 3);
        assert!(cache.is_empty());
    }

    // ==================== Expiry ====================

    #[tokio::test(start_paused = true)]
    async fn test_expired_get_is_miss_and_removes() {
        let cache = PointCache::new(PointCacheConfig {
            entry_ttl: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        put(&cache, 9, 1.0);
        assert!(cache.get(9).is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.get(9).is_none());
        assert!(!cache.contains(9));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.expirations), (1, 1, 1));
        assert!((stats.hit_ratio - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_expired_and_older_than() {
        let cache = PointCache::new(PointCacheConfig {
            entry_ttl: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        put(&cache, 1, 1.0);
        tokio::time::advance(Duration::from_secs(40)).await;
        put(&cache, 2, 2.0);

        assert_eq!(cache.remove_older_than(Duration::from_secs(30)), 1);
        assert!(cache.contains(2));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.remove_expired(), 1);
        assert!(cache.is_empty());
    }

    // ==================== Queries ====================

    #[test]
    fn test_range_and_quality_queries() {
        let cache = cache(10);
        for ioa in [5, 10, 15, 20] {
            put(&cache, ioa, ioa as f32);
        }
        cache
            .update(15, TypeId::MeasuredFloat, DataValue::Float(0.0), QualityFlags::INVALID, None)
            .unwrap();
        let blocked = QualityFlags::from_byte(0x10);
        cache
            .update(20, TypeId::MeasuredFloat, DataValue::Float(0.0), blocked, None)
            .unwrap();

        let ioas: Vec<_> = cache.range(8..=20).iter().map(|e| e.ioa).collect();
        assert_eq!(ioas, [10, 15, 20]);

        let bad: Vec<_> = cache.by_quality(QualityLevel::Bad).iter().map(|e| e.ioa).collect();
        assert_eq!(bad, [15]);
        assert_eq!(cache.get(15).unwrap().text(), "Invalid");

        assert_eq!(cache.remove_by_quality(QualityLevel::Uncertain), 1);
        let left: Vec<_> = cache.snapshot().iter().map(|e| e.ioa).collect();
        assert_eq!(left, [5, 10, 15]);
    }

    #[test]
    fn test_stats_memory_estimate_grows() {
        let cache = cache(100);
        let empty = cache.stats().memory_bytes;
        for ioa in 1..=10 {
            put(&cache, ioa, 0.0);
        }
        let stats = cache.stats();
        assert_eq!(stats.entries, 10);
        assert_eq!(stats.updates, 10);
        assert!(stats.memory_bytes > empty);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().updates, 10);
    }
}
