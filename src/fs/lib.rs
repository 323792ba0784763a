//! The VFS facade: every storage operation exposed to the API layer
//! routes through here, so driver dispatch-by-capability and
//! cache/index invalidation only need to be implemented once.

#[macro_use]
extern crate tracing;

pub mod facade;
pub mod invalidation;

pub use facade::{FsFacade, MountInfo};
pub use invalidation::{CacheInvalidationEvent, InvalidationReason};
