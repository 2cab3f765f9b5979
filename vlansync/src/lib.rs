//! vlansync: keep a SQLite VLAN table in step with device output, and push
//! it back to devices.
//!
//! Data flows one way per operation: raw `show vlan` text is parsed into
//! [`record::VlanRecord`]s, the [`reconciler::Reconciler`] makes the store
//! match them, and the [`device::Projector`] writes stored VLANs to a device.

pub mod audit;
pub mod device;
pub mod inventory;
pub mod parser;
pub mod reconciler;
pub mod record;
pub mod service;
pub mod store;
