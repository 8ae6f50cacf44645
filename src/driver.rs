//! Host-facing driver.
//!
//! [`Iec104Driver`] keeps one [`DeviceEngine`] per device key and exposes
//! the read/write surface a SCADA host polls. Reads never touch the
//! network and never fail: an unknown device, a malformed tag or a missing
//! value all come back as a bad-quality reading.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::{
    CacheManager, CacheManagerConfig, CacheManagerStats, PointEntry, TagCache, TagCacheConfig,
    TagCacheStats, TagLookup,
};
use crate::client::{Connector, TcpConnector};
use crate::config::DeviceEndpoint;
use crate::engine::{ConnectionState, DeviceEngine, EngineContext, EngineEvent};
use crate::error::{Iec104Error, Result};
use crate::mapping::{resolve_tag_type, DataType, TagAddress};
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::types::{QualityLevel, TypeId};
use crate::value::clamp_normalized;

/// Driver configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverConfig {
    /// Point caches
    pub caches: CacheManagerConfig,
    /// Tag boundary cache
    pub tags: TagCacheConfig,
}

/// A value as handed to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointReading {
    /// Formatted value; `None` when nothing is known
    pub value: Option<String>,
    /// Quality level
    pub quality: QualityLevel,
    /// Source or receive time of the value
    pub timestamp: Option<DateTime<Utc>>,
}

impl PointReading {
    /// Reading with no value and bad quality.
    pub fn bad() -> Self {
        Self {
            value: None,
            quality: QualityLevel::Bad,
            timestamp: None,
        }
    }

    fn from_entry(entry: &PointEntry) -> Self {
        Self {
            value: Some(entry.text()),
            quality: entry.level(),
            timestamp: Some(entry.timestamp),
        }
    }
}

/// Operational counters of the whole driver.
#[derive(Debug, Clone, Default)]
pub struct DriverStatistics {
    /// Registered devices
    pub devices: usize,
    /// Devices with a live session
    pub connected: usize,
    /// Point cache totals
    pub caches: CacheManagerStats,
    /// Tag cache totals
    pub tags: TagCacheStats,
}

/// IEC 104 client driver for many devices.
///
/// ```rust,ignore
/// let driver = Iec104Driver::new(DriverConfig::default());
/// driver.add_device("feeder-1", "10.0.0.5|2404|1|5000")?;
/// driver.connect("feeder-1").await?;
/// driver.start();
///
/// let reading = driver.read_tag("feeder-1", "1001", "SP");
/// driver.write_tag("feeder-1", "6001:0:1", "SC", "on").await?;
/// ```
pub struct Iec104Driver {
    ctx: EngineContext,
    devices: RwLock<HashMap<String, DeviceEngine>>,
    tags: TagCache,
    maintenance: Mutex<Option<ScheduledTask>>,
}

impl std::fmt::Debug for Iec104Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Iec104Driver")
            .field("devices", &self.device_keys())
            .finish_non_exhaustive()
    }
}

impl Iec104Driver {
    /// Driver connecting over TCP.
    pub fn new(config: DriverConfig) -> Self {
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    /// Driver using a custom transport.
    pub fn with_connector(config: DriverConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            ctx: EngineContext {
                connector,
                caches: Arc::new(CacheManager::new(config.caches)),
                scheduler: Scheduler::new(),
                events: None,
            },
            devices: RwLock::new(HashMap::new()),
            tags: TagCache::new(config.tags),
            maintenance: Mutex::new(None),
        }
    }

    /// Deliver engine events of devices added afterwards to `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<EngineEvent>) -> Self {
        self.ctx.events = Some(events);
        self
    }

    /// Point caches of all devices.
    pub fn caches(&self) -> &Arc<CacheManager> {
        &self.ctx.caches
    }

    // ==================== Devices ====================

    /// Register a device from its identity string.
    ///
    /// Adding an existing key with the same endpoint returns the existing
    /// engine; a different endpoint under a used key is refused.
    pub fn add_device(&self, key: &str, identity: &str) -> Result<DeviceEngine> {
        let endpoint = DeviceEndpoint::parse(identity)?;
        let mut devices = self.devices.write();
        if let Some(existing) = devices.get(key) {
            if existing.endpoint() == &endpoint {
                return Ok(existing.clone());
            }
            return Err(Iec104Error::InvalidDeviceId {
                field: "DeviceKey",
                value: key.to_string(),
            });
        }

        let engine = DeviceEngine::new(key, endpoint, self.ctx.clone());
        devices.insert(key.to_string(), engine.clone());
        info!(device = key, endpoint = %engine.endpoint(), "Device added");
        Ok(engine)
    }

    /// Dispose a device's engine and drop its cached values.
    pub async fn remove_device(&self, key: &str) -> bool {
        let Some(engine) = self.devices.write().remove(key) else {
            return false;
        };
        engine.dispose().await;
        self.tags.remove_device(key);
        info!(device = key, "Device removed");
        true
    }

    /// Engine of `key`.
    pub fn device(&self, key: &str) -> Result<DeviceEngine> {
        self.devices
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Iec104Error::UnknownDevice(key.to_string()))
    }

    /// Registered device keys, sorted.
    pub fn device_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.devices.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn engines(&self) -> Vec<DeviceEngine> {
        self.devices.read().values().cloned().collect()
    }

    /// Connection state of `key`.
    pub fn state(&self, key: &str) -> Result<ConnectionState> {
        Ok(self.device(key)?.state())
    }

    /// Connect one device.
    pub async fn connect(&self, key: &str) -> Result<()> {
        self.device(key)?.connect().await
    }

    /// Connect every device concurrently.
    pub async fn connect_all(&self) -> Vec<(String, Result<()>)> {
        fan_out(self.engines(), |engine| async move { engine.connect().await }).await
    }

    // ==================== Reads ====================

    /// Cached value of `ioa` on `key`; `None` on a miss or unknown device.
    pub fn read(&self, key: &str, ioa: u32) -> Option<PointReading> {
        if !self.devices.read().contains_key(key) {
            debug!(device = key, "Read from unknown device");
            return None;
        }
        self.ctx
            .caches
            .cache_for(key)
            .get(ioa)
            .map(|entry| PointReading::from_entry(&entry))
    }

    /// Read a host tag. Never fails; problems come back as a bad reading.
    ///
    /// A point cache hit refreshes the tag cache. On a miss the last value
    /// the tag cache still holds is served.
    pub fn read_tag(&self, key: &str, address: &str, tag_type: &str) -> PointReading {
        let target = TagAddress::parse(address).and_then(|address| {
            let data_type = resolve_tag_type(tag_type)?;
            Ok((address, data_type))
        });
        let (address, data_type) = match target {
            Ok(target) => target,
            Err(e) => {
                warn!(device = key, address, tag_type, error = %e, "Bad tag");
                return PointReading::bad();
            }
        };
        if !data_type.is_readable() {
            warn!(device = key, address = %address, data_type = %data_type, "Tag type is not readable");
            return PointReading::bad();
        }

        let tag_key = TagCache::key(key, &address.ioa.to_string());
        if let Some(reading) = self.read(key, address.ioa) {
            if let Some(value) = &reading.value {
                self.tags.insert(&tag_key, value.clone(), reading.quality, None);
            }
            return reading;
        }

        match self.tags.lookup(&tag_key) {
            TagLookup::Hit(cached) => PointReading {
                value: Some(cached.value),
                quality: cached.quality,
                timestamp: Some(cached.updated),
            },
            TagLookup::Miss | TagLookup::Expired => PointReading::bad(),
        }
    }

    // ==================== Writes ====================

    /// Send a command of `type_id` to `ioa` on `key`.
    pub async fn write(&self, key: &str, ioa: u32, type_id: TypeId, value: &str) -> Result<()> {
        self.device(key)?.write(ioa, type_id, value, 0, false).await
    }

    /// Write a host tag.
    ///
    /// The address may carry a qualifier and select flag. Normalized
    /// set-points are clamped into [-1, 1] only when the device enables
    /// `clampnormalized`; otherwise out-of-range values are rejected.
    pub async fn write_tag(&self, key: &str, address: &str, tag_type: &str, value: &str) -> Result<()> {
        let engine = self.device(key)?;
        let address = TagAddress::parse(address)?;
        let data_type = resolve_tag_type(tag_type)?;
        if !data_type.is_writable() {
            return Err(Iec104Error::ReadOnly(format!("{data_type} at IOA {}", address.ioa)));
        }

        let normalized = matches!(
            data_type,
            DataType::SetpointNormalized | DataType::SetpointNormalizedTime56
        );
        let value = match value.trim().parse::<f64>() {
            Ok(number) if normalized && engine.endpoint().clamp_normalized => {
                clamp_normalized(number).to_string()
            }
            _ => value.to_string(),
        };

        engine
            .write(address.ioa, data_type.type_id(), &value, address.qualifier, address.select)
            .await?;
        self.tags.remove(&TagCache::key(key, &address.ioa.to_string()));
        Ok(())
    }

    // ==================== Interrogation ====================

    /// General interrogation of one device.
    pub async fn general_interrogation(&self, key: &str) -> Result<()> {
        self.device(key)?.general_interrogation().await
    }

    /// Counter interrogation of one device.
    pub async fn counter_interrogation(&self, key: &str) -> Result<()> {
        self.device(key)?.counter_interrogation().await
    }

    /// General interrogation of every connected device, concurrently.
    ///
    /// Failures are reported per device and do not affect the others.
    pub async fn interrogate_all(&self) -> Vec<(String, Result<()>)> {
        let connected: Vec<DeviceEngine> = self
            .engines()
            .into_iter()
            .filter(DeviceEngine::is_connected)
            .collect();
        let results = fan_out(connected, |engine| async move {
            engine.general_interrogation().await
        })
        .await;
        for (key, result) in &results {
            if let Err(e) = result {
                warn!(device = %key, error = %e, "Interrogation failed");
            }
        }
        results
    }

    // ==================== Lifecycle ====================

    /// Start periodic tasks of every device and cache maintenance.
    pub fn start(&self) {
        for engine in self.engines() {
            engine.start();
        }
        let mut maintenance = self.maintenance.lock();
        if maintenance.is_none() {
            *maintenance = Some(self.ctx.caches.start_maintenance(&self.ctx.scheduler));
        }
    }

    /// Stop background work, dispose every engine and drop all caches.
    pub async fn shutdown(&self) {
        self.ctx.scheduler.shutdown();
        self.maintenance.lock().take();
        let engines: Vec<DeviceEngine> = self.devices.write().drain().map(|(_, e)| e).collect();
        join_all(engines.iter().map(DeviceEngine::dispose)).await;
        self.ctx.caches.clear();
        self.tags.clear();
        info!(devices = engines.len(), "Driver shut down");
    }

    /// Operational statistics.
    pub fn statistics(&self) -> DriverStatistics {
        let engines = self.engines();
        DriverStatistics {
            devices: engines.len(),
            connected: engines.iter().filter(|e| e.is_connected()).count(),
            caches: self.ctx.caches.stats(),
            tags: self.tags.stats(),
        }
    }
}

async fn fan_out<F, Fut>(engines: Vec<DeviceEngine>, op: F) -> Vec<(String, Result<()>)>
where
    F: Fn(DeviceEngine) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let keys: Vec<String> = engines.iter().map(|e| e.key().to_string()).collect();
    let results = join_all(engines.into_iter().map(op)).await;
    let mut out: Vec<(String, Result<()>)> = keys.into_iter().zip(results).collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataValue, QualityFlags};

    fn driver() -> Iec104Driver {
        Iec104Driver::new(DriverConfig::default())
    }

    // ==================== Devices ====================

    #[test]
    fn test_add_device_validates_identity() {
        let driver = driver();
        assert!(driver.add_device("a", "10.0.0.5|2404|1|5000").is_ok());
        assert!(driver.add_device("a", "10.0.0.5|2404|1|5000").is_ok());
        assert!(matches!(
            driver.add_device("a", "10.0.0.6|2404|1|5000"),
            Err(Iec104Error::InvalidDeviceId { field: "DeviceKey", .. })
        ));
        assert!(matches!(
            driver.add_device("b", "10.0.0.5|2404"),
            Err(Iec104Error::MissingField(_))
        ));
        assert_eq!(driver.device_keys(), ["a"]);
        assert_eq!(driver.state("a").unwrap(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let driver = driver();
        assert!(matches!(driver.connect("x").await, Err(Iec104Error::UnknownDevice(_))));
        assert!(driver.read("x", 1).is_none());
        assert_eq!(driver.read_tag("x", "1", "SP"), PointReading::bad());
        assert!(!driver.remove_device("x").await);
    }

    // ==================== Reads ====================

    #[test]
    fn test_read_tag_from_cache() {
        let driver = driver();
        driver.add_device("a", "10.0.0.5|2404|1|5000").unwrap();
        driver
            .caches()
            .cache_for("a")
            .update(1001, TypeId::SinglePoint, DataValue::Single(true), QualityFlags::GOOD, None)
            .unwrap();

        let reading = driver.read_tag("a", "1001", "sp");
        assert_eq!(reading.value.as_deref(), Some("1"));
        assert_eq!(reading.quality, QualityLevel::Good);
        assert!(reading.timestamp.is_some());
    }

    #[test]
    fn test_read_tag_falls_back_to_tag_cache() {
        let driver = driver();
        driver.add_device("a", "10.0.0.5|2404|1|5000").unwrap();
        let cache = driver.caches().cache_for("a");
        cache
            .update(5, TypeId::MeasuredFloat, DataValue::Float(2.5), QualityFlags::GOOD, None)
            .unwrap();
        assert_eq!(driver.read_tag("a", "5", "Float").value.as_deref(), Some("2.500000"));

        cache.remove(5);
        assert_eq!(driver.read_tag("a", "5", "Float").value.as_deref(), Some("2.500000"));
    }

    #[test]
    fn test_read_tag_degrades_on_bad_input() {
        let driver = driver();
        driver.add_device("a", "10.0.0.5|2404|1|5000").unwrap();
        assert_eq!(driver.read_tag("a", "0", "SP"), PointReading::bad());
        assert_eq!(driver.read_tag("a", "1", "NoSuchType"), PointReading::bad());
        assert_eq!(driver.read_tag("a", "1", "SC"), PointReading::bad());
        assert_eq!(driver.read_tag("a", "1", "SP"), PointReading::bad());
    }

    // ==================== Writes ====================

    #[tokio::test]
    async fn test_write_tag_rejects_before_sending() {
        let driver = driver();
        driver.add_device("a", "10.0.0.5|2404|1|5000").unwrap();

        let err = driver.write_tag("a", "1", "SP", "1").await.unwrap_err();
        assert!(matches!(err, Iec104Error::ReadOnly(_)));

        let err = driver.write_tag("a", "1", "SE_NA", "1.5").await.unwrap_err();
        assert!(matches!(err, Iec104Error::ValueOutOfRange { .. }));

        let err = driver.write_tag("a", "1", "Bogus", "1").await.unwrap_err();
        assert!(matches!(err, Iec104Error::InvalidTagType { .. }));
    }

    #[tokio::test]
    async fn test_interrogate_all_skips_disconnected() {
        let driver = driver();
        driver.add_device("a", "10.0.0.5|2404|1|5000").unwrap();
        assert!(driver.interrogate_all().await.is_empty());
        assert!(driver.general_interrogation("a").await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_clears_everything() {
        let driver = driver();
        driver.add_device("a", "10.0.0.5|2404|1|5000").unwrap();
        driver.caches().cache_for("a");
        driver.start();

        driver.shutdown().await;
        let stats = driver.statistics();
        assert_eq!(stats.devices, 0);
        assert_eq!(stats.caches.devices, 0);
    }
}
