//! # voltage_iec104_driver
//!
//! IEC 60870-5-104 client engine with per-device point caching.
//!
//! The crate connects to many remote stations at once, keeps the latest
//! value, quality and time of every information object they report, and
//! turns host tag writes into protocol commands.
//!
//! ## Features
//!
//! - **Link layer**: STARTDT handshake, I/S/U frames, K/W windows, T1-T3
//! - **Engine**: connect with bounded retries, scheduled reconnect, session
//!   lifetime and idle recycling, periodic interrogation
//! - **Caching**: capacity-bounded point caches with a type index, eviction
//!   policies and statistics; a TTL cache at the host tag boundary
//! - **Isolation**: one broken information element never drops its siblings
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use voltage_iec104_driver::{DriverConfig, Iec104Driver};
//!
//! #[tokio::main]
//! async fn main() -> voltage_iec104_driver::Result<()> {
//!     let driver = Iec104Driver::new(DriverConfig::default());
//!     driver.add_device("bay-3", "192.168.1.100|2404|1|5000|12|8|t3=30")?;
//!     driver.connect("bay-3").await?;
//!     driver.start();
//!
//!     let breaker = driver.read_tag("bay-3", "1001", "DP");
//!     println!("{:?} ({})", breaker.value, breaker.quality);
//!
//!     driver.write_tag("bay-3", "6001:0:0", "Setpoint", "123.45").await?;
//!     driver.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Layers
//!
//! ```text
//! Iec104Driver ─► DeviceEngine ─► ClientHandle ─► session task ─► Framed<TcpStream, Iec104Codec>
//!       │               │
//!       ▼               ▼
//!   TagCache      CacheManager ─► PointCache (one per device)
//! ```
//!
//! ### APDU Structure
//!
//! ```text
//! APCI (6 bytes):
//! +--------+--------+--------+--------+--------+--------+
//! | 0x68   | Length | Control Field (4 bytes)           |
//! +--------+--------+--------+--------+--------+--------+
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod mapping;
pub mod parser;
pub mod scheduler;
pub mod types;
pub mod value;

// Re-export main types
pub use cache::{CacheManager, EvictionPolicy, PointCache, PointEntry, TagCache};
pub use client::{ClientConfig, ClientHandle, Connector, Iec104Event, TcpConnector};
pub use codec::{Apdu, Iec104Codec};
pub use config::{DeviceEndpoint, InterrogationPolicy, ReconnectPolicy};
pub use driver::{DriverConfig, Iec104Driver, PointReading};
pub use engine::{ConnectionState, DeviceEngine, EngineContext, EngineEvent};
pub use error::{ErrorCategory, Iec104Error, Result};
pub use mapping::{resolve_tag_type, DataType, TagAddress};
pub use parser::parse_asdu;
pub use scheduler::Scheduler;
pub use types::*;
