//! STRATUM Storage
//!
//! The per-node record of which services are enabled and with what
//! placement. Records survive restarts; only the enablement state machine
//! writes them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod record;
pub mod store;

pub use record::{Activation, NodeEnablementRecord};
pub use store::{MemoryRecordStore, RecordStore, RedbRecordStore, StoreConfig, StoreError, StoreStats};
