//! Block payload compression.
//!
//! Only the zip (zlib) codec is implemented; the remaining codes are
//! recognized so their headers decode, and rejected with
//! [`VolumeError::CompressionUnsupported`] when a payload actually uses
//! them.

use crate::error::{Result, VolumeError};
use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression as ZlibLevel;
use std::io::Read;

/// Compression kind of a block payload or field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Raw samples.
    #[default]
    None,
    /// Zlib-compressed samples.
    Zip,
    /// JPEG (recognized, not implemented).
    Jpg,
    /// OpenEXR (recognized, not implemented).
    Exr,
    /// PNG (recognized, not implemented).
    Png,
    /// ZFP (recognized in descriptors only; no on-disk header code).
    Zfp,
}

impl Compression {
    /// Decodes the low four flag bits of a block header.
    pub fn from_header_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Compression::None),
            3 => Some(Compression::Zip),
            4 => Some(Compression::Jpg),
            5 => Some(Compression::Exr),
            6 => Some(Compression::Png),
            _ => None,
        }
    }

    /// The on-disk header code, if the codec has one.
    pub fn header_code(self) -> Option<u32> {
        match self {
            Compression::None => Some(0),
            Compression::Zip => Some(3),
            Compression::Jpg => Some(4),
            Compression::Exr => Some(5),
            Compression::Png => Some(6),
            Compression::Zfp => None,
        }
    }

    /// Parses a descriptor compression name. Unknown names mean
    /// uncompressed, matching how old descriptors are read.
    pub fn from_name(name: &str) -> Self {
        match name {
            "zip" => Compression::Zip,
            "jpeg" | "jpg" => Compression::Jpg,
            "exr" => Compression::Exr,
            "png" => Compression::Png,
            "zfp" => Compression::Zfp,
            _ => Compression::None,
        }
    }
}

/// Decompresses a block payload into a fresh buffer.
///
/// `expected` sizes the output buffer up front; the payload may still
/// inflate to a different length (blocks near the domain boundary carry
/// fewer samples), so the result's length is whatever the stream produced.
pub fn decompress(kind: Compression, src: &[u8], expected: usize) -> Result<Vec<u8>> {
    match kind {
        Compression::None => Ok(src.to_vec()),
        Compression::Zip => {
            let mut out = Vec::with_capacity(expected);
            ZlibDecoder::new(src)
                .read_to_end(&mut out)
                .map_err(VolumeError::Io)?;
            Ok(out)
        }
        other => Err(VolumeError::CompressionUnsupported(other)),
    }
}

/// Compresses a block payload with the zip codec.
pub fn compress_zip(src: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibEncoder::new(src, ZlibLevel::default())
        .read_to_end(&mut out)
        .map_err(VolumeError::Io)?;
    Ok(out)
}
