//! Little-endian fixed-width primitives shared by the blob, index and WAL
//! formats.
//!
//! Lengths and timestamps are 4 bytes, blob offsets 8 bytes, flags a single
//! byte. A read that yields fewer bytes than the declared width fails with
//! [`Error::Corrupt`].

use crate::error::{Error, Result};
use std::io::{ErrorKind, Read};

pub fn write_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

pub fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    fill(reader, &mut buf)?;
    Ok(buf[0])
}

pub fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    fill(reader, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    fill(reader, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Reads a 4-byte length at a record boundary, returning `None` on a clean
/// end-of-file instead of an error.
pub fn read_u32_or_eof<R: Read>(reader: &mut R) -> Result<Option<u32>> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        let n = match reader.read(&mut buf[filled..]) {
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(Error::Io(err)),
        };
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::Corrupt("short read"));
        }
        filled += n;
    }
    Ok(Some(u32::from_le_bytes(buf)))
}

pub fn read_exact<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    fill(reader, &mut buf)?;
    Ok(buf)
}

fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|err| {
        if err.kind() == ErrorKind::UnexpectedEof {
            Error::Corrupt("short read")
        } else {
            Error::Io(err)
        }
    })
}
