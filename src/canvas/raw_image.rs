//! Raw RGBA image blobs as stored in the editor's undo/redo history.
//!
//! # Format
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 6 | tag, always `RAWIMG` |
//! | 6 | 4 | width, little-endian u32 |
//! | 10 | 4 | height, little-endian u32 |
//! | 14 | `width * height * 4` | RGBA pixels |

use thiserror::Error;

pub const RAW_IMAGE_TAG: &[u8; 6] = b"RAWIMG";
pub const HEADER_LEN: usize = 14;
const BYTES_PER_PIXEL: u64 = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobError {
    #[error("blob too short for header ({0} bytes)")]
    TooShort(usize),
    #[error("unrecognized blob tag")]
    BadTag,
    #[error("pixel buffer size overflows for {width}x{height}")]
    Overflow { width: u32, height: u32 },
    #[error("pixel data truncated: expected {expected} bytes, found {actual}")]
    Truncated { expected: u64, actual: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawImageHeader {
    pub width: u32,
    pub height: u32,
}

impl RawImageHeader {
    /// Size of the decoded RGBA buffer.
    pub fn pixel_bytes(&self) -> Option<u64> {
        u64::from(self.width)
            .checked_mul(u64::from(self.height))?
            .checked_mul(BYTES_PER_PIXEL)
    }
}

/// Validate a blob and return its header.
pub fn decode_header(blob: &[u8]) -> Result<RawImageHeader, BlobError> {
    if blob.len() < HEADER_LEN {
        return Err(BlobError::TooShort(blob.len()));
    }
    if &blob[..6] != RAW_IMAGE_TAG {
        return Err(BlobError::BadTag);
    }

    let width = u32::from_le_bytes([blob[6], blob[7], blob[8], blob[9]]);
    let height = u32::from_le_bytes([blob[10], blob[11], blob[12], blob[13]]);
    let header = RawImageHeader { width, height };

    let expected = header
        .pixel_bytes()
        .ok_or(BlobError::Overflow { width, height })?;
    let actual = (blob.len() - HEADER_LEN) as u64;
    if actual < expected {
        return Err(BlobError::Truncated { expected, actual });
    }

    Ok(header)
}

/// Decoded pixel-buffer size of a blob.
pub fn decoded_size(blob: &[u8]) -> Result<u64, BlobError> {
    let header = decode_header(blob)?;
    header.pixel_bytes().ok_or(BlobError::Overflow {
        width: header.width,
        height: header.height,
    })
}

/// Build a blob from RGBA pixels. `pixels` should hold `width * height * 4` bytes.
pub fn encode_raw_image(width: u32, height: u32, pixels: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(HEADER_LEN + pixels.len());
    blob.extend_from_slice(RAW_IMAGE_TAG);
    blob.extend_from_slice(&width.to_le_bytes());
    blob.extend_from_slice(&height.to_le_bytes());
    blob.extend_from_slice(pixels);
    blob
}
