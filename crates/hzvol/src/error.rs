//! Error and Result types for volume operations.

use crate::compression::Compression;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A convenience `Result` type for volume operations.
pub type Result<T> = std::result::Result<T, VolumeError>;

/// The error type for volume operations.
///
/// Errors split into two families. *Fatal* errors abort the call that
/// produced them. *Non-fatal* errors (a missing backing file or an
/// unwritten block during a read) describe sparse data; the read path
/// counts them in its summary instead of failing. [`VolumeError::is_fatal`]
/// encodes the split.
#[derive(Debug, Error)]
pub enum VolumeError {
    /// A backing file or descriptor file does not exist.
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// The descriptor text could not be parsed.
    #[error("descriptor parse error: {0}")]
    ParsingError(String),

    /// The backing file is smaller than its block-header table.
    #[error("block header table not found in backing file")]
    HeaderNotFound,

    /// The header records the block as never written.
    #[error("block {0:#x} not present in backing file")]
    BlockNotFound(u64),

    /// A payload read came up short against the recorded offset/length.
    #[error("failed to read block {0:#x} payload")]
    BlockReadFailed(u64),

    /// A payload write came up short at the recorded offset.
    #[error("failed to write block {0:#x} payload")]
    BlockWriteFailed(u64),

    /// The per-file block-header table could not be persisted.
    #[error("failed to write block header table")]
    HeaderWriteFailed,

    /// A block header carries a compression code outside the known set.
    #[error("invalid compression code {0} in block header")]
    InvalidCompression(u32),

    /// The codec is recognized but not implemented by this build.
    #[error("compression {0:?} is not supported")]
    CompressionUnsupported(Compression),

    /// The layout bit decodes to neither row-major nor hz order.
    #[error("invalid sample layout in block header")]
    InvalidFormat,

    /// The requested hz level is outside `[0, max_hz_level]`.
    #[error("hz level {level} outside [0, {max}]")]
    InvalidHzLevel {
        /// The requested level.
        level: u32,
        /// The dataset's maximum level.
        max: u32,
    },

    /// The descriptor failed verification.
    #[error("invalid dataset descriptor: {0}")]
    InvalidDataset(String),

    /// The query extent has `from > to` on some axis.
    #[error("invalid query volume (from > to)")]
    InvalidVolume,

    /// The query extent is not contained in the dataset's box.
    #[error("query volume exceeds the dataset bounds")]
    VolumeTooBig,

    /// The field index is out of range.
    #[error("field index {0} out of range")]
    FieldNotFound(usize),

    /// The time step is outside the dataset's time range.
    #[error("time step {0} out of range")]
    TimeStepNotFound(i32),

    /// The destination grid cannot receive the source samples: its buffer
    /// is too small or its strides do not divide the source strides.
    #[error("destination grid incompatible: {0}")]
    InvalidGrid(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl VolumeError {
    /// Returns false for the sparse-data outcomes a read tolerates
    /// (missing backing file, unwritten block, short header table) and true
    /// for everything else.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            VolumeError::FileNotFound(_)
                | VolumeError::BlockNotFound(_)
                | VolumeError::HeaderNotFound
        )
    }
}
