//! The two index handlers: full rebuild and incremental dirty-queue
//! application. Both are registered as `TaskHandler`s in the gateway
//! binary's startup wiring.

pub mod apply_dirty;
pub mod rebuild;
mod reindex;

pub use apply_dirty::FsIndexApplyDirtyHandler;
pub use rebuild::FsIndexRebuildHandler;
