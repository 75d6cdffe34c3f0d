//! Frame I/O for the append-only blob file.
//!
//! The blob starts with an 18-byte ASCII header and is followed by frames of
//! the form `(flag u8, payload_length u32, payload)`. The flag records
//! whether the payload is raw bytes (1) or a structured-encoded value (0);
//! payloads are always zlib-compressed. A frame's `start` offset is the
//! offset of its flag byte.

use crate::codec;
use crate::error::{Error, Result};
use crate::index::Entry;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};

/// Sentinel written once when the blob file is created.
pub const HEADER: &[u8; 18] = b"blob.cache.data.01";

/// Size of the blob header in bytes.
pub const HEADER_LEN: u64 = HEADER.len() as u64;

/// Fixed per-frame cost: flag byte plus length prefix.
pub const FRAME_OVERHEAD: u32 = 1 + 4;

pub const FLAG_ENCODED: u8 = 0;
pub const FLAG_BYTES: u8 = 1;

/// Compresses a payload with zlib-wrapped deflate at level 6.
pub fn compress(payload: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(6));
    encoder
        .write_all(payload)
        .map_err(|err| Error::Codec(err.to_string()))?;
    encoder.finish().map_err(|err| Error::Codec(err.to_string()))
}

/// Inflates any valid zlib stream.
pub fn decompress(payload: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(payload);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|err| Error::Codec(err.to_string()))?;
    Ok(out)
}

/// Appends a frame holding the already-compressed payload and returns its
/// `(start, total_length)`.
pub fn append_frame(
    writer: &mut BufWriter<File>,
    payload: &[u8],
    is_bytes: bool,
) -> Result<(u64, u32)> {
    let start = writer.seek(SeekFrom::End(0))?;
    let mut frame = Vec::with_capacity(FRAME_OVERHEAD as usize + payload.len());
    codec::write_u8(&mut frame, if is_bytes { FLAG_BYTES } else { FLAG_ENCODED });
    codec::write_u32(&mut frame, payload.len() as u32);
    frame.extend_from_slice(payload);
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok((start, frame.len() as u32))
}

/// Reads the frame described by `entry` and returns `(is_bytes, payload)`
/// with the payload decompressed.
pub fn read_frame(reader: &mut File, entry: &Entry) -> Result<(bool, Vec<u8>)> {
    reader.seek(SeekFrom::Start(entry.start))?;
    let is_bytes = match codec::read_u8(reader)? {
        FLAG_BYTES => true,
        FLAG_ENCODED => false,
        _ => return Err(Error::Corrupt("unknown frame flag")),
    };
    let payload_len = codec::read_u32(reader)?;
    if FRAME_OVERHEAD.checked_add(payload_len) != Some(entry.length) {
        return Err(Error::Corrupt("frame length mismatch"));
    }
    let payload = codec::read_exact(reader, payload_len as usize)?;
    Ok((is_bytes, decompress(&payload)?))
}
