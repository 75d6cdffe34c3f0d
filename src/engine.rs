//! High-level cache engine orchestrating the blob file, in-memory index and
//! WAL.
//!
//! The engine is single-threaded: mutating operations take `&mut self` and
//! cross-process exclusion is provided by an advisory lock on the blob file.
//! Every mutation flushes user-space buffers before returning; durability
//! across power loss is a caller concern.

use crate::blob;
use crate::cache::ReadCache;
use crate::compaction;
use crate::config::{DEFAULT_AUTO_VACUUM_THRESHOLD, EngineConfig};
use crate::error::{Error, Result};
use crate::index::{self, Entry};
use crate::value::Value;
use crate::wal::{self, Wal};
use fs2::FileExt;
use log::{debug, info};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Persistent key-value cache over one append-only blob file.
pub struct BlobCache {
    paths: StorePaths,
    config: EngineConfig,
    state: Option<OpenState>,
}

/// Builder used to configure the cache before opening it.
#[derive(Clone, Debug)]
pub struct BlobCacheBuilder {
    base: PathBuf,
    auto_vacuum_threshold: f64,
    cache_capacity: Option<NonZeroUsize>,
}

/// Accumulated operation counters plus storage figures.
#[derive(Clone, Debug, PartialEq)]
pub struct Stats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub refreshes: u64,
    pub fragmentation_ratio: f64,
    pub total_keys: usize,
    pub data_file_size_bytes: u64,
}

#[derive(Clone, Copy, Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    sets: u64,
    deletes: u64,
    refreshes: u64,
}

/// Handles and bookkeeping that exist only while the engine is open.
struct OpenState {
    /// Append handle on the blob; owns the advisory lock.
    blob: BufWriter<File>,
    reader: File,
    wal: Wal,
    index: HashMap<String, Entry>,
    cache: Option<ReadCache>,
    blob_size: u64,
    live_bytes: u64,
    counters: Counters,
}

#[derive(Clone, Debug)]
struct StorePaths {
    data: PathBuf,
    data_tmp: PathBuf,
    index: PathBuf,
    index_tmp: PathBuf,
    wal: PathBuf,
}

impl StorePaths {
    fn new(base: &Path) -> Self {
        Self {
            data: suffixed(base, ".data.bin"),
            data_tmp: suffixed(base, ".data.bin.tmp"),
            index: suffixed(base, ".index.bin"),
            index_tmp: suffixed(base, ".index.bin.tmp"),
            wal: suffixed(base, ".wal.bin"),
        }
    }
}

fn suffixed(base: &Path, suffix: &str) -> PathBuf {
    let mut path = base.as_os_str().to_os_string();
    path.push(suffix);
    PathBuf::from(path)
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as u32)
        .unwrap_or(0)
}

fn lock_error(err: io::Error) -> Error {
    if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
        Error::Locked
    } else {
        Error::Io(err)
    }
}

impl BlobCache {
    /// Opens the cache rooted at `base` with default configuration.
    ///
    /// `base` is a path prefix: the store lives in `<base>.data.bin`,
    /// `<base>.index.bin` and `<base>.wal.bin`.
    pub fn open(base: impl AsRef<Path>) -> Result<Self> {
        BlobCacheBuilder::new(base).open()
    }

    /// Returns a builder to customize the vacuum gate and read cache.
    pub fn builder(base: impl AsRef<Path>) -> BlobCacheBuilder {
        BlobCacheBuilder::new(base)
    }

    /// Stores `value` under `key`, replacing any previous entry.
    ///
    /// A `ttl` greater than zero expires the entry `ttl` seconds from now.
    /// Raw bytes and plain strings are stored verbatim; other values are
    /// encoded as structured text. The frame is appended to the blob and the
    /// index update is logged to the WAL before this returns.
    pub fn set(&mut self, key: &str, value: impl Into<Value>, ttl: Option<u32>) -> Result<()> {
        self.set_value(key, value.into(), ttl)
    }

    fn set_value(&mut self, key: &str, value: Value, ttl: Option<u32>) -> Result<()> {
        let state = self.state.as_mut().ok_or(Error::Closed)?;
        if key.is_empty() || key.len() > u32::MAX as usize {
            return Err(Error::BadKey);
        }
        let now = unix_now();
        let expires = match ttl {
            Some(ttl) if ttl > 0 => now.saturating_add(ttl),
            _ => 0,
        };

        let (payload, is_bytes, structured) = match value {
            Value::Bytes(bytes) => (bytes, true, None),
            Value::Text(text) => (text.into_bytes(), true, None),
            value => {
                let encoded = value.encode()?;
                (encoded, false, Some(value))
            }
        };

        let compressed = blob::compress(&payload)?;
        if compressed.len() as u64 > u64::from(u32::MAX - blob::FRAME_OVERHEAD) {
            return Err(Error::BadValue("value too large for one frame".into()));
        }
        let (start, length) = blob::append_frame(&mut state.blob, &compressed, is_bytes)?;
        state.blob_size = start + u64::from(length);

        let entry = Entry::new(start, length, expires);
        if let Some(previous) = state.index.insert(key.to_owned(), entry) {
            state.live_bytes -= u64::from(previous.length);
        }
        state.live_bytes += u64::from(length);
        state.wal.append_upsert(key, &entry)?;

        if let Some(cache) = &mut state.cache {
            let decoded = structured.unwrap_or_else(|| Value::Bytes(payload));
            cache.put(key.to_owned(), decoded, expires);
        }
        state.counters.sets += 1;
        Ok(())
    }

    /// Returns the value stored under `key`, or [`Error::NotFound`] if the
    /// key is absent or expired.
    pub fn get(&mut self, key: &str) -> Result<Value> {
        self.lookup(key)?.ok_or(Error::NotFound)
    }

    /// Like [`get`](Self::get), but on a miss stores `refresh(key)` with
    /// `new_ttl` and returns it.
    pub fn get_or_refresh<F>(&mut self, key: &str, refresh: F, new_ttl: Option<u32>) -> Result<Value>
    where
        F: FnOnce(&str) -> Value,
    {
        if let Some(value) = self.lookup(key)? {
            return Ok(value);
        }
        let fresh = refresh(key);
        self.set_value(key, fresh.clone(), new_ttl)?;
        if let Some(state) = self.state.as_mut() {
            state.counters.refreshes += 1;
        }
        Ok(fresh)
    }

    fn lookup(&mut self, key: &str) -> Result<Option<Value>> {
        let now = unix_now();
        let state = self.state.as_mut().ok_or(Error::Closed)?;
        let entry = match state.index.get(key).copied() {
            Some(entry) => entry,
            None => {
                state.counters.misses += 1;
                return Ok(None);
            }
        };
        if entry.is_expired(now) {
            state.reap_expired(key)?;
            state.counters.misses += 1;
            return Ok(None);
        }

        let cached = state.cache.as_mut().and_then(|cache| cache.get(key, now));
        let value = match cached {
            Some(value) => value,
            None => {
                let (is_bytes, payload) = blob::read_frame(&mut state.reader, &entry)?;
                let value = if is_bytes {
                    Value::Bytes(payload)
                } else {
                    Value::decode(&payload)?
                };
                if let Some(cache) = &mut state.cache {
                    cache.put(key.to_owned(), value.clone(), entry.expires);
                }
                value
            }
        };
        state.counters.hits += 1;
        Ok(Some(value))
    }

    /// Returns whether `key` holds a live entry. `now == expires` still
    /// counts as live; strictly after the deadline does not.
    pub fn has(&self, key: &str) -> Result<bool> {
        let now = unix_now();
        let state = self.state.as_ref().ok_or(Error::Closed)?;
        Ok(state
            .index
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now)))
    }

    /// Removes `key` if present; removing an absent key is a no-op.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        let state = self.state.as_mut().ok_or(Error::Closed)?;
        if let Some(previous) = state.index.remove(key) {
            state.live_bytes -= u64::from(previous.length);
            state.wal.append_delete(key)?;
            if let Some(cache) = &mut state.cache {
                cache.remove(key);
            }
            state.counters.deletes += 1;
        }
        Ok(())
    }

    /// Alias for [`delete`](Self::delete).
    pub fn del(&mut self, key: &str) -> Result<()> {
        self.delete(key)
    }

    /// Deletes every key whose bytes start with `prefix` and returns how
    /// many were removed.
    pub fn delete_starts_with(&mut self, prefix: &str) -> Result<usize> {
        let state = self.state.as_ref().ok_or(Error::Closed)?;
        let doomed: Vec<String> = state
            .index
            .keys()
            .filter(|key| key.as_bytes().starts_with(prefix.as_bytes()))
            .cloned()
            .collect();
        for key in &doomed {
            self.delete(key)?;
        }
        Ok(doomed.len())
    }

    /// Returns a snapshot of the currently live keys, in no particular
    /// order. [`has`](Self::has) remains the authoritative check.
    pub fn keys(&self) -> Result<Vec<String>> {
        let now = unix_now();
        let state = self.state.as_ref().ok_or(Error::Closed)?;
        Ok(state
            .index
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect())
    }

    /// Returns when `key` expires: absolute seconds since the epoch, or
    /// seconds from now when `relative`. Entries that never expire yield 0
    /// (absolute) or `-now` (relative).
    pub fn when_expired(&self, key: &str, relative: bool) -> Result<i64> {
        let now = unix_now();
        let state = self.state.as_ref().ok_or(Error::Closed)?;
        let entry = state
            .index
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .ok_or(Error::NotFound)?;
        let absolute = i64::from(entry.expires);
        Ok(if relative {
            absolute - i64::from(now)
        } else {
            absolute
        })
    }

    /// Fraction of the blob (excluding the header) not covered by live
    /// frames: 0 is perfectly packed, 1 is empty or fully dead.
    pub fn fragmentation_ratio(&self) -> Result<f64> {
        let state = self.state.as_ref().ok_or(Error::Closed)?;
        Ok(state.fragmentation())
    }

    /// Returns accumulated counters and storage figures.
    pub fn stats(&self) -> Result<Stats> {
        let state = self.state.as_ref().ok_or(Error::Closed)?;
        Ok(Stats {
            hits: state.counters.hits,
            misses: state.counters.misses,
            sets: state.counters.sets,
            deletes: state.counters.deletes,
            refreshes: state.counters.refreshes,
            fragmentation_ratio: state.fragmentation(),
            total_keys: state.index.len(),
            data_file_size_bytes: state.blob_size,
        })
    }

    /// Rewrites the blob to contain only live frames, reclaiming dead bytes.
    ///
    /// The rebuilt index is snapshotted and the WAL reset, so the compacted
    /// state is durable when this returns.
    pub fn vacuum(&mut self) -> Result<()> {
        let state = self.state.as_mut().ok_or(Error::Closed)?;
        state.vacuum(&self.paths)
    }

    /// Flushes everything, optionally vacuums, persists the index snapshot,
    /// removes the WAL and releases the lock. All subsequent operations,
    /// including a second `close`, fail with [`Error::Closed`].
    pub fn close(&mut self) -> Result<()> {
        let mut state = self.state.take().ok_or(Error::Closed)?;
        let fragmentation = state.fragmentation();
        if compaction::should_vacuum(fragmentation, self.config.auto_vacuum_threshold) {
            debug!(
                "close triggering vacuum: fragmentation {:.3} over threshold {:.3}",
                fragmentation, self.config.auto_vacuum_threshold
            );
            state.vacuum(&self.paths)?;
        }
        state.blob.flush()?;
        index::save(&self.paths.index, &self.paths.index_tmp, &state.index)?;
        let counters = state.counters;
        state.wal.remove()?;
        info!(
            "closed cache at {}: {} sets, {} hits, {} misses, {} deletes, {} refreshes",
            self.paths.data.display(),
            counters.sets,
            counters.hits,
            counters.misses,
            counters.deletes,
            counters.refreshes
        );
        Ok(())
    }
}

impl OpenState {
    fn fragmentation(&self) -> f64 {
        let data_bytes = self.blob_size.saturating_sub(blob::HEADER_LEN);
        if data_bytes == 0 {
            return 1.0;
        }
        1.0 - self.live_bytes as f64 / data_bytes as f64
    }

    /// Drops an entry observed to be expired, logging the removal so it does
    /// not resurface from the WAL on the next open.
    fn reap_expired(&mut self, key: &str) -> Result<()> {
        if let Some(previous) = self.index.remove(key) {
            self.live_bytes -= u64::from(previous.length);
            self.wal.append_delete(key)?;
            if let Some(cache) = &mut self.cache {
                cache.remove(key);
            }
        }
        Ok(())
    }

    fn vacuum(&mut self, paths: &StorePaths) -> Result<()> {
        let now = unix_now();
        let before = self.blob_size;
        self.blob.flush()?;

        let rebuilt = {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&paths.data_tmp)?;
            let mut out = BufWriter::new(file);
            out.write_all(blob::HEADER)?;
            let rebuilt = compaction::copy_live_frames(
                &mut self.reader,
                &self.index,
                &mut out,
                blob::HEADER_LEN,
                now,
            )?;
            out.flush()?;
            rebuilt
        };
        fs::rename(&paths.data_tmp, &paths.data)?;

        // Swap both handles onto the renamed file before the old ones (and
        // the old inode's lock) drop.
        let file = OpenOptions::new().append(true).open(&paths.data)?;
        file.try_lock_exclusive().map_err(lock_error)?;
        let reader = File::open(&paths.data)?;
        let blob_size = file.metadata()?.len();
        self.blob = BufWriter::new(file);
        self.reader = reader;
        self.live_bytes = rebuilt.values().map(|entry| u64::from(entry.length)).sum();
        self.blob_size = blob_size;
        self.index = rebuilt;

        index::save(&paths.index, &paths.index_tmp, &self.index)?;
        self.wal.reset()?;
        info!(
            "vacuumed {}: {} -> {} bytes ({} live keys)",
            paths.data.display(),
            before,
            self.blob_size,
            self.index.len()
        );
        Ok(())
    }
}

impl BlobCacheBuilder {
    /// Creates a builder rooted at the provided base path.
    pub fn new(base: impl AsRef<Path>) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
            auto_vacuum_threshold: DEFAULT_AUTO_VACUUM_THRESHOLD,
            cache_capacity: None,
        }
    }

    /// Sets the fragmentation ratio above which close rewrites the blob.
    /// Clamped to `[0, 1]`; 1.0 disables auto-vacuum.
    pub fn auto_vacuum_threshold(mut self, threshold: f64) -> Self {
        self.auto_vacuum_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Enables an in-memory cache of decoded values, sized by entry count.
    pub fn cache_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    /// Opens the cache: takes the file lock, ensures the blob header, loads
    /// the index snapshot, replays and resets the WAL.
    pub fn open(self) -> Result<BlobCache> {
        let paths = StorePaths::new(&self.base);
        let now = unix_now();
        if let Some(parent) = paths.data.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&paths.data)?;
        file.try_lock_exclusive().map_err(lock_error)?;

        let mut blob_size = file.metadata()?.len();
        if blob_size == 0 {
            file.write_all(blob::HEADER)?;
            blob_size = blob::HEADER_LEN;
        } else if blob_size < blob::HEADER_LEN {
            return Err(Error::Corrupt("truncated header"));
        }

        let mut reader = File::open(&paths.data)?;
        let mut header = [0u8; blob::HEADER.len()];
        reader.read_exact(&mut header)?;
        if &header != blob::HEADER {
            return Err(Error::Corrupt("unrecognized header"));
        }

        let mut loaded = index::load(&paths.index, now)?;
        let replayed = Wal::replay_into(&paths.wal, now, &mut loaded)?;
        wal::remove_file(&paths.wal)?;
        let wal = Wal::create(&paths.wal)?;
        let live_bytes = loaded.values().map(|entry| u64::from(entry.length)).sum();

        info!(
            "opened cache at {}: {} keys, {} wal records replayed",
            paths.data.display(),
            loaded.len(),
            replayed
        );

        Ok(BlobCache {
            paths,
            state: Some(OpenState {
                blob: BufWriter::new(file),
                reader,
                wal,
                index: loaded,
                cache: self.cache_capacity.map(ReadCache::new),
                blob_size,
                live_bytes,
                counters: Counters::default(),
            }),
            config: EngineConfig {
                auto_vacuum_threshold: self.auto_vacuum_threshold,
                cache_capacity: self.cache_capacity,
            },
        })
    }
}
