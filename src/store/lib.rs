//! The durable ledgers behind the storage gateway: the multipart
//! session/parts store and the VFS search index store.
//!
//! Both are embedded, single-node stores — no replication, no
//! cross-instance locking. Sessions live in raw `sled` trees; the
//! search index lives in `rusqlite` with an FTS5 trigram virtual
//! table, since contains-semantics full text search is exactly what
//! FTS5's trigram tokenizer gives for free.

#[macro_use]
extern crate tracing;

pub mod index;
pub mod model;
pub mod session;

pub use index::SearchIndexStore;
pub use session::SessionStore;
