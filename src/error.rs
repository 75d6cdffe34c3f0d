//! Error types shared across the cache.

use thiserror::Error;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by cache operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The key is empty or longer than the on-disk format can describe.
    #[error("invalid key")]
    BadKey,

    /// The value is neither raw bytes nor encodable as a structured value.
    #[error("value is not representable: {0}")]
    BadValue(String),

    /// The key is absent or expired and no refresh callback was supplied.
    #[error("key not found")]
    NotFound,

    /// The engine was already closed.
    #[error("cache is closed")]
    Closed,

    /// Another process holds the lock on the data file.
    #[error("data file is locked by another process")]
    Locked,

    /// Underlying filesystem failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Compression, decompression, or structured encode/decode failure.
    #[error("codec error: {0}")]
    Codec(String),

    /// Short read, malformed frame, or inconsistent length on disk.
    #[error("corrupt store: {0}")]
    Corrupt(&'static str),
}
