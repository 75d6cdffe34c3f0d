//! In-memory index pointing to frames in the blob file, and its on-disk
//! snapshot.
//!
//! The snapshot is a headerless sequence of `(key_len u32, key, start u64,
//! length u32, expires u32)` entries. It is written to a sibling temp file
//! and renamed into place so a crash mid-save leaves the previous snapshot
//! intact.

use crate::codec;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;

/// Location and lifetime of a value frame within the blob.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Entry {
    /// Byte offset of the frame's flag byte inside the blob file.
    pub start: u64,
    /// Total frame size in bytes, including flag and length prefix.
    pub length: u32,
    /// Absolute expiration in seconds since the epoch; 0 means never.
    pub expires: u32,
}

impl Entry {
    pub fn new(start: u64, length: u32, expires: u32) -> Self {
        Self {
            start,
            length,
            expires,
        }
    }

    /// An entry is expired strictly after its deadline: `now == expires` is
    /// still live.
    pub fn is_expired(&self, now: u32) -> bool {
        expired(self.expires, now)
    }
}

/// Shared expiry predicate; 0 means never expires.
pub fn expired(expires: u32, now: u32) -> bool {
    expires != 0 && now > expires
}

/// Atomically replaces the snapshot at `path` with the given index.
pub fn save(path: &Path, tmp_path: &Path, index: &HashMap<String, Entry>) -> Result<()> {
    {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(tmp_path)?;
        let mut writer = BufWriter::new(file);
        let mut buf = Vec::new();
        for (key, entry) in index {
            buf.clear();
            codec::write_u32(&mut buf, key.len() as u32);
            buf.extend_from_slice(key.as_bytes());
            codec::write_u64(&mut buf, entry.start);
            codec::write_u32(&mut buf, entry.length);
            codec::write_u32(&mut buf, entry.expires);
            writer.write_all(&buf)?;
        }
        writer.flush()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

/// Loads the snapshot at `path`, skipping entries already expired at `now`.
/// A missing file yields an empty index.
pub fn load(path: &Path, now: u32) -> Result<HashMap<String, Entry>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(err) => return Err(err.into()),
    };
    let mut reader = BufReader::new(file);
    let mut index = HashMap::new();

    while let Some(key_len) = codec::read_u32_or_eof(&mut reader)? {
        let key_bytes = codec::read_exact(&mut reader, key_len as usize)?;
        let key = String::from_utf8(key_bytes).map_err(|_| Error::Corrupt("non-utf8 key"))?;
        let entry = Entry::new(
            codec::read_u64(&mut reader)?,
            codec::read_u32(&mut reader)?,
            codec::read_u32(&mut reader)?,
        );
        if !entry.is_expired(now) {
            index.insert(key, entry);
        }
    }

    Ok(index)
}
