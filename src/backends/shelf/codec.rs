//! Framing for shelf log records.
//!
//! Every record is written as one frame:
//! - Version byte for forward compatibility
//! - Length prefix so a reader can skip or bound the payload
//! - CRC32 checksum for corruption detection

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;

/// Current frame version.
const FRAME_VERSION: u8 = 1;

/// Current file format version, written after the magic.
pub const FORMAT_VERSION: u8 = 1;

/// Magic bytes identifying a shelf file.
pub const MAGIC: [u8; 4] = *b"PRSV";

/// Size of the file header in bytes.
pub const HEADER_LEN: u64 = 5;

/// Frames larger than this are treated as corruption.
const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Frames a payload with its checksum.
///
/// Format:
/// ```text
/// [version: 1 byte][length: 4 bytes LE][payload: N bytes][crc32: 4 bytes LE]
/// ```
///
/// # Errors
/// - `InvalidInput` if the payload exceeds the maximum frame size
pub fn encode_frame(payload: &[u8]) -> IoResult<Vec<u8>> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidInput,
            format!("record size {} exceeds maximum {MAX_FRAME_SIZE}", payload.len()),
        ));
    }
    let len = u32::try_from(payload.len())
        .map_err(|_| IoError::new(ErrorKind::InvalidInput, "record too large"))?;

    let mut hasher = Hasher::new();
    hasher.update(payload);
    let crc = hasher.finalize();

    let mut out = Vec::with_capacity(1 + 4 + payload.len() + 4);
    out.push(FRAME_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Reads one frame, verifying its checksum.
///
/// # Errors
/// - `UnexpectedEof` if the frame is cut short
/// - `InvalidData` on a bad version, oversized length, or checksum mismatch
pub fn decode_frame(reader: &mut impl Read) -> IoResult<Vec<u8>> {
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != FRAME_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported frame version: {} (expected {FRAME_VERSION})", version[0]),
        ));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("record size {len} exceeds maximum {MAX_FRAME_SIZE}"),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&payload);
    let computed_crc = hasher.finalize();
    if stored_crc != computed_crc {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("CRC mismatch: stored={stored_crc:08x}, computed={computed_crc:08x}"),
        ));
    }

    Ok(payload)
}

/// Writes the file header.
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[FORMAT_VERSION])
}

/// Reads and validates the file header, returning the format version.
///
/// # Errors
/// - `InvalidData` if the magic does not match or the version is newer
///   than this build understands
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("not a shelf file: expected magic {MAGIC:?}, got {magic:?}"),
        ));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] > FORMAT_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported shelf format version {}", version[0]),
        ));
    }
    Ok(version[0])
}
