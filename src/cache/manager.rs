//! Device cache registry.
//!
//! One [`PointCache`] per device key, created on first touch. The manager
//! tracks when each device was last touched and its maintenance tick
//! sweeps expired points from every device in parallel, then tears down
//! caches that have been idle longer than the inactivity window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::point::{PointCache, PointCacheConfig, PointCacheStats};
use crate::error::Iec104Error;
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::types::DataPoint;

/// Cache manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheManagerConfig {
    /// Configuration for each device cache
    pub point: PointCacheConfig,
    /// Device caches untouched for this long are dropped
    pub inactivity_window: Duration,
    /// Period of the maintenance tick
    pub maintenance_period: Duration,
}

impl Default for CacheManagerConfig {
    fn default() -> Self {
        Self {
            point: PointCacheConfig::default(),
            inactivity_window: Duration::from_secs(3600),
            maintenance_period: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct DeviceSlot {
    cache: Arc<PointCache>,
    last_activity: Mutex<Instant>,
}

impl DeviceSlot {
    fn touch(&self) -> Arc<PointCache> {
        *self.last_activity.lock() = Instant::now();
        Arc::clone(&self.cache)
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_activity.lock())
    }
}

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Points dropped for exceeding their TTL
    pub expired_points: usize,
    /// Device keys whose caches were torn down
    pub evicted_devices: Vec<String>,
}

/// Aggregated statistics over all device caches.
#[derive(Debug, Clone, Default)]
pub struct CacheManagerStats {
    /// Live device caches
    pub devices: usize,
    /// Points across all devices
    pub entries: usize,
    /// Hits across all devices
    pub hits: u64,
    /// Misses across all devices
    pub misses: u64,
    /// Overall hit ratio
    pub hit_ratio: f64,
    /// Rough heap footprint in bytes
    pub memory_bytes: usize,
    /// Per-device breakdown, ordered by key
    pub per_device: Vec<(String, PointCacheStats)>,
}

/// Owns the point cache of every device.
#[derive(Debug, Default)]
pub struct CacheManager {
    config: CacheManagerConfig,
    devices: RwLock<HashMap<String, DeviceSlot>>,
}

impl CacheManager {
    /// Create an empty manager.
    pub fn new(config: CacheManagerConfig) -> Self {
        Self {
            config,
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &CacheManagerConfig {
        &self.config
    }

    /// Cache for `key`, created if missing. Marks the device active.
    pub fn cache_for(&self, key: &str) -> Arc<PointCache> {
        let devices = self.devices.upgradable_read();
        if let Some(slot) = devices.get(key) {
            return slot.touch();
        }

        let mut devices = RwLockUpgradableReadGuard::upgrade(devices);
        self.slot(&mut devices, key).touch()
    }

    /// Store decoded points of `key`, creating its cache if missing.
    ///
    /// The device map stays locked until the batch is in, so an inactive
    /// teardown cannot drop the cache between lookup and store.
    pub fn update_batch<I>(&self, key: &str, points: I) -> Vec<(u32, Iec104Error)>
    where
        I: IntoIterator<Item = DataPoint>,
    {
        {
            let devices = self.devices.read();
            if let Some(slot) = devices.get(key) {
                return slot.touch().update_batch(points);
            }
        }

        let mut devices = self.devices.write();
        self.slot(&mut devices, key).touch().update_batch(points)
    }

    fn slot<'a>(&self, devices: &'a mut HashMap<String, DeviceSlot>, key: &str) -> &'a DeviceSlot {
        devices.entry(key.to_string()).or_insert_with(|| {
            debug!(device = key, "Creating device cache");
            DeviceSlot {
                cache: Arc::new(PointCache::new(self.config.point.clone())),
                last_activity: Mutex::new(Instant::now()),
            }
        })
    }

    /// Existing cache for `key`. Marks the device active.
    pub fn get(&self, key: &str) -> Option<Arc<PointCache>> {
        self.devices.read().get(key).map(DeviceSlot::touch)
    }

    /// Whether a cache exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.devices.read().contains_key(key)
    }

    /// Drop the cache of `key` and all its entries.
    pub fn remove_device(&self, key: &str) -> bool {
        let removed = self.devices.write().remove(key);
        match removed {
            Some(slot) => {
                slot.cache.clear();
                true
            }
            None => false,
        }
    }

    /// Keys of all live device caches, sorted.
    pub fn device_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.devices.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of live device caches.
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Whether no device cache exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired points from every device cache, one blocking task per
    /// device. Returns the number of points dropped.
    pub async fn sweep_expired(&self) -> usize {
        if self.config.point.entry_ttl.is_none() {
            return 0;
        }
        let caches: Vec<(String, Arc<PointCache>)> = self
            .devices
            .read()
            .iter()
            .map(|(key, slot)| (key.clone(), Arc::clone(&slot.cache)))
            .collect();

        let sweeps = caches.into_iter().map(|(key, cache)| async move {
            match tokio::task::spawn_blocking(move || cache.remove_expired()).await {
                Ok(removed) => removed,
                Err(e) => {
                    warn!(device = %key, error = %e, "Expiry sweep failed");
                    0
                }
            }
        });
        join_all(sweeps).await.into_iter().sum()
    }

    /// Tear down device caches idle longer than the inactivity window.
    pub fn evict_inactive(&self) -> Vec<String> {
        let now = Instant::now();
        let window = self.config.inactivity_window;
        let mut devices = self.devices.write();
        let idle: Vec<String> = devices
            .iter()
            .filter(|(_, slot)| slot.idle_for(now) > window)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &idle {
            if let Some(slot) = devices.remove(key) {
                slot.cache.clear();
                info!(device = %key, idle = ?window, "Dropped inactive device cache");
            }
        }
        idle
    }

    /// One maintenance pass: expiry sweep, then inactive teardown.
    pub async fn maintain(&self) -> MaintenanceReport {
        let expired_points = self.sweep_expired().await;
        let mut evicted_devices = self.evict_inactive();
        evicted_devices.sort();
        if expired_points > 0 || !evicted_devices.is_empty() {
            debug!(expired_points, evicted = evicted_devices.len(), "Cache maintenance");
        }
        MaintenanceReport {
            expired_points,
            evicted_devices,
        }
    }

    /// Run [`maintain`](Self::maintain) on the scheduler every maintenance period.
    pub fn start_maintenance(self: &Arc<Self>, scheduler: &Scheduler) -> ScheduledTask {
        let manager = Arc::clone(self);
        scheduler.every("cache-maintenance", self.config.maintenance_period, move || {
            let manager = Arc::clone(&manager);
            async move {
                manager.maintain().await;
            }
        })
    }

    /// Aggregated statistics.
    pub fn stats(&self) -> CacheManagerStats {
        let mut per_device: Vec<(String, PointCacheStats)> = self
            .devices
            .read()
            .iter()
            .map(|(key, slot)| (key.clone(), slot.cache.stats()))
            .collect();
        per_device.sort_by(|a, b| a.0.cmp(&b.0));

        let mut stats = CacheManagerStats {
            devices: per_device.len(),
            ..Default::default()
        };
        for (_, device) in &per_device {
            stats.entries += device.entries;
            stats.hits += device.hits;
            stats.misses += device.misses;
            stats.memory_bytes += device.memory_bytes;
        }
        let lookups = stats.hits + stats.misses;
        if lookups > 0 {
            stats.hit_ratio = stats.hits as f64 / lookups as f64;
        }
        stats.per_device = per_device;
        stats
    }

    /// Drop every device cache.
    pub fn clear(&self) {
        let drained: Vec<DeviceSlot> = self.devices.write().drain().map(|(_, slot)| slot).collect();
        for slot in drained {
            slot.cache.clear();
        }
    }
}
