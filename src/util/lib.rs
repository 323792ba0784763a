//! Cross-cutting utilities shared by every storage gateway crate: the
//! error taxonomy, time helpers, id generation, configuration loading,
//! the background worker runner and a small retry helper.

#[macro_use]
extern crate tracing;

pub mod background;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod retry;
pub mod time;

pub use error::Error;
