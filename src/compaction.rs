//! Vacuum heuristics and the live-frame copy used to rebuild the blob.

use crate::error::{Error, Result};
use crate::index::Entry;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};

/// Returns `true` when the fragmentation ratio justifies rewriting the blob
/// on close. A threshold of 1.0 disables auto-vacuum.
pub fn should_vacuum(ratio: f64, threshold: f64) -> bool {
    ratio > threshold
}

/// Copies every live frame from `src` into `out` (positioned just past the
/// header), dropping entries expired at `now`, and returns the rebuilt index
/// with the new offsets.
pub fn copy_live_frames(
    src: &mut File,
    index: &HashMap<String, Entry>,
    out: &mut BufWriter<File>,
    header_len: u64,
    now: u32,
) -> Result<HashMap<String, Entry>> {
    let mut rebuilt = HashMap::with_capacity(index.len());
    let mut offset = header_len;
    let mut frame = Vec::new();

    for (key, entry) in index {
        if entry.is_expired(now) {
            continue;
        }
        src.seek(SeekFrom::Start(entry.start))?;
        frame.resize(entry.length as usize, 0);
        src.read_exact(&mut frame).map_err(|err| {
            if err.kind() == ErrorKind::UnexpectedEof {
                Error::Corrupt("frame truncated during vacuum")
            } else {
                Error::Io(err)
            }
        })?;
        out.write_all(&frame)?;
        rebuilt.insert(key.clone(), Entry::new(offset, entry.length, entry.expires));
        offset += entry.length as u64;
    }

    Ok(rebuilt)
}
