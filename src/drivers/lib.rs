//! Backend drivers for the storage gateway: a uniform
//! capability-dispatched interface (`capability.rs`), and the drivers
//! that implement it — S3-compatible object storage, Telegram
//! chat-file storage, and a read-only virtual/aggregated driver.
//!
//! The coordinator and FS facade never match on a concrete driver
//! type; they dispatch by capability flag, one uniform contract over
//! multiple backends.

#[macro_use]
extern crate tracing;

pub mod cache;
pub mod capability;
pub mod s3;
pub mod telegram;
pub mod r#virtual;

pub use capability::{
	Capability, CapabilitySet, Driver, DownloadDescriptor, DriverError, ItemStat, PartUploadResult,
};
