//! Caching layer.
//!
//! - [`point`]: latest state per information object for one device
//! - [`manager`]: one point cache per device key with background maintenance
//! - [`tag`]: TTL cache of formatted readings at the host tag boundary

pub mod manager;
pub mod point;
pub mod tag;

pub use manager::{CacheManager, CacheManagerConfig, CacheManagerStats, MaintenanceReport};
pub use point::{EvictionPolicy, PointCache, PointCacheConfig, PointCacheStats, PointEntry};
pub use tag::{TagCache, TagCacheConfig, TagCacheStats, TagLookup, TagValue};
