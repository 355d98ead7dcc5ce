//! Binary codec for trace records.
//!
//! Every record is framed as:
//! ```text
//! [version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
//! ```
//! The JSON payload is internally tagged by variant, so a record is
//! self-describing; the version byte guards the payload schema.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::CodecError;

/// Current record schema version.
pub const RECORD_VERSION: u8 = 1;

/// Magic bytes identifying trace files.
pub const MAGIC: [u8; 4] = *b"CTRC";

/// Size of the file header (magic + format version).
pub const HEADER_LEN: u64 = 5;

/// Bytes a frame adds around its payload.
pub const FRAME_OVERHEAD: usize = 1 + 4 + 4;

/// Reject unreasonably large records (64 MB).
pub const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// Serializes a value into a checksummed frame.
///
/// # Errors
/// Returns `Malformed` if the value cannot be serialized, `TooLarge` if the
/// payload exceeds [`MAX_RECORD_SIZE`].
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let data = serde_json::to_vec(value)
        .map_err(|e| CodecError::Malformed(format!("serialization failed: {e}")))?;

    if data.len() > MAX_RECORD_SIZE {
        return Err(CodecError::TooLarge {
            size: data.len(),
            max: MAX_RECORD_SIZE,
        });
    }

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let crc = hasher.finalize();

    let len = u32::try_from(data.len()).map_err(|_| CodecError::TooLarge {
        size: data.len(),
        max: MAX_RECORD_SIZE,
    })?;

    let mut out = Vec::with_capacity(FRAME_OVERHEAD + data.len());
    out.push(RECORD_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&crc.to_le_bytes());

    Ok(out)
}

/// Parses the first five bytes of a frame, returning its payload length.
///
/// Only the length is validated here; version and checksum are checked when
/// the full frame is decoded, so a damaged record is reported individually.
///
/// # Errors
/// Returns `TooLarge` if the declared length exceeds [`MAX_RECORD_SIZE`].
pub fn payload_len(prefix: [u8; 5]) -> Result<usize, CodecError> {
    let len = u32::from_le_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]) as usize;
    if len > MAX_RECORD_SIZE {
        return Err(CodecError::TooLarge {
            size: len,
            max: MAX_RECORD_SIZE,
        });
    }
    Ok(len)
}

/// Deserializes a complete frame, verifying version and checksum.
///
/// # Errors
/// - `Truncated` if the frame is shorter than its declared length
/// - `UnsupportedVersion` if written by an incompatible schema
/// - `ChecksumMismatch` if the payload is corrupted
/// - `Malformed` if the payload does not deserialize
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, CodecError> {
    if frame.len() < FRAME_OVERHEAD {
        return Err(CodecError::Truncated);
    }

    if frame[0] != RECORD_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: frame[0],
            expected: RECORD_VERSION,
        });
    }

    let len = payload_len([frame[0], frame[1], frame[2], frame[3], frame[4]])?;
    if frame.len() < FRAME_OVERHEAD + len {
        return Err(CodecError::Truncated);
    }

    let data = &frame[5..5 + len];
    let crc_bytes = &frame[5 + len..9 + len];
    let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

    let mut hasher = Hasher::new();
    hasher.update(data);
    let computed = hasher.finalize();

    if stored != computed {
        return Err(CodecError::ChecksumMismatch { stored, computed });
    }

    serde_json::from_slice(data)
        .map_err(|e| CodecError::Malformed(format!("deserialization failed: {e}")))
}

/// Write the file header (magic + version).
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[RECORD_VERSION])?;
    Ok(())
}

/// Read and validate the file header.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;

    if magic != MAGIC {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}"),
        ));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;

    Ok(version[0])
}
