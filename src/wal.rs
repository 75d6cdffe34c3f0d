//! Write-ahead log making index updates crash-safe between snapshots.
//!
//! Records are `(key_len u32, key, op u8)` followed, for upserts, by the
//! index entry fields `(start u64, length u32, expires u32)`. The log is
//! appended on every mutation and flushed before the mutating call returns;
//! it is replayed at open and removed once the index snapshot is durable.

use crate::codec;
use crate::error::{Error, Result};
use crate::index::Entry;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

const OP_DELETE: u8 = 0;
const OP_UPSERT: u8 = 1;

/// One replayed log record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WalRecord {
    Upsert { key: String, entry: Entry },
    Delete { key: String },
}

/// Append handle on the log file.
#[derive(Debug)]
pub struct Wal {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Wal {
    /// Opens the log at `path` for appending, creating it if absent.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Appends an upsert record for `key` and flushes.
    pub fn append_upsert(&mut self, key: &str, entry: &Entry) -> Result<()> {
        let mut buf = Vec::with_capacity(4 + key.len() + 1 + 8 + 4 + 4);
        codec::write_u32(&mut buf, key.len() as u32);
        buf.extend_from_slice(key.as_bytes());
        codec::write_u8(&mut buf, OP_UPSERT);
        codec::write_u64(&mut buf, entry.start);
        codec::write_u32(&mut buf, entry.length);
        codec::write_u32(&mut buf, entry.expires);
        self.write(&buf)
    }

    /// Appends a delete record for `key` and flushes.
    pub fn append_delete(&mut self, key: &str) -> Result<()> {
        let mut buf = Vec::with_capacity(4 + key.len() + 1);
        codec::write_u32(&mut buf, key.len() as u32);
        buf.extend_from_slice(key.as_bytes());
        codec::write_u8(&mut buf, OP_DELETE);
        self.write(&buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.writer.write_all(buf)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Unlinks the log file and reopens it fresh, discarding every record.
    /// Used after the index snapshot has made the log redundant.
    pub fn reset(&mut self) -> Result<()> {
        self.writer.flush()?;
        remove_file(&self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        Ok(())
    }

    /// Flushes pending bytes, closes the handle and removes the log file.
    pub fn remove(mut self) -> Result<()> {
        self.writer.flush()?;
        let path = self.path.clone();
        drop(self);
        remove_file(&path)
    }

    /// Replays the log at `path` onto `index` in record order, skipping
    /// upserts already expired at `now`. Returns the number of records
    /// applied. A missing file is an empty log; a trailing record that
    /// cannot be fully parsed is treated as a torn tail and ends replay.
    pub fn replay_into(
        path: &Path,
        now: u32,
        index: &mut HashMap<String, Entry>,
    ) -> Result<u64> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let mut reader = BufReader::new(file);
        let mut applied = 0u64;

        while let Some(record) = Self::next_record(&mut reader)? {
            match record {
                WalRecord::Upsert { key, entry } => {
                    if entry.is_expired(now) {
                        index.remove(&key);
                    } else {
                        index.insert(key, entry);
                    }
                }
                WalRecord::Delete { key } => {
                    index.remove(&key);
                }
            }
            applied += 1;
        }

        Ok(applied)
    }

    fn next_record<R: Read>(reader: &mut R) -> Result<Option<WalRecord>> {
        match Self::parse_record(reader) {
            Ok(record) => Ok(record),
            // A half-written record at the tail replays as if absent.
            Err(Error::Corrupt(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn parse_record<R: Read>(reader: &mut R) -> Result<Option<WalRecord>> {
        let key_len = match codec::read_u32_or_eof(reader)? {
            Some(len) => len,
            None => return Ok(None),
        };
        let key_bytes = codec::read_exact(reader, key_len as usize)?;
        let key = String::from_utf8(key_bytes).map_err(|_| Error::Corrupt("non-utf8 key"))?;
        match codec::read_u8(reader)? {
            OP_DELETE => Ok(Some(WalRecord::Delete { key })),
            OP_UPSERT => {
                let entry = Entry::new(
                    codec::read_u64(reader)?,
                    codec::read_u32(reader)?,
                    codec::read_u32(reader)?,
                );
                Ok(Some(WalRecord::Upsert { key, entry }))
            }
            _ => Err(Error::Corrupt("unknown wal opcode")),
        }
    }
}

/// Removes the log file at `path`, tolerating its absence.
pub fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
