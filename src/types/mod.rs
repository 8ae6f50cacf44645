//! IEC 60870-5-104 type definitions.
//!
//! This module contains the core protocol types:
//!
//! - `TypeId` - Type identification (M_SP_NA_1, etc.) and its wire layout
//! - `Cot` - Cause of transmission
//! - `Apci` - Application Protocol Control Information
//! - `Asdu` - Application Service Data Unit
//! - `QualityFlags` - IV/NT/SB/BL quality byte and its three-level summary
//! - `Cp24Time2a` / `Cp56Time2a` - Binary time tags
//! - `DataPoint` / `DataValue` - Decoded information objects

mod apci;
mod asdu;
mod cot;
mod data;
mod quality;
mod time;
mod type_id;

pub use apci::*;
pub use asdu::*;
pub use cot::*;
pub use data::*;
pub use quality::*;
pub use time::*;
pub use type_id::*;
