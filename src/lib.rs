//! blobcache: an embedded, single-process, persistent key-value cache.
//!
//! Values live in one append-only blob file; a compact on-disk index and a
//! write-ahead log make index updates crash-safe between snapshot saves.

pub mod blob;
pub mod cache;
pub mod codec;
pub mod compaction;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod value;
pub mod wal;

pub use engine::{BlobCache, BlobCacheBuilder, Stats};
pub use error::{Error, Result};
pub use value::Value;
