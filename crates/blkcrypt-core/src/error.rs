//! Error types for the transformation engine.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for engine operations.
pub type TransformResult<T> = Result<T, TransformError>;

/// Error variants for device transformation.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// OpenSSL failure during cipher init, update, or finalization.
    #[error("cipher error: {0}")]
    Cipher(#[from] openssl::error::ErrorStack),

    /// The configured chunk size is zero or not block-aligned.
    #[error("chunk size {chunk_size} must be a positive multiple of {block_len}")]
    InvalidChunkSize {
        /// The rejected chunk size in bytes.
        chunk_size: u64,
        /// The cipher block length in bytes.
        block_len: u64,
    },

    /// The device length is not a whole number of chunks.
    #[error("device size {device_size} is not a multiple of chunk size {chunk_size}")]
    MisalignedDevice {
        /// Device length in bytes.
        device_size: u64,
        /// Configured chunk size in bytes.
        chunk_size: u64,
    },

    /// The workdir path does not point at a directory.
    #[error("workdir {path:?} is not a directory")]
    NotADirectory {
        /// The rejected path.
        path: PathBuf,
    },

    /// Another process holds the workdir lock.
    #[error("workdir {path:?} is locked by another process")]
    WorkdirLocked {
        /// The contended workdir.
        path: PathBuf,
    },

    /// Decryption was requested but `.iv` / `.key` are absent.
    #[error("key and/or IV absent; decryption requires the workdir of a prior encryption run")]
    MissingKeyMaterial,

    /// A workdir artifact exists but has the wrong size.
    #[error("artifact {name} has size {actual}, expected {expected}")]
    ArtifactSize {
        /// Artifact file name inside the workdir.
        name: String,
        /// Size found on disk.
        actual: u64,
        /// Required size.
        expected: u64,
    },

    /// A key buffer of the wrong length was supplied to the cipher.
    #[error("key length {actual} does not match expected {expected}")]
    KeyLength {
        /// Required key length.
        expected: usize,
        /// Supplied key length.
        actual: usize,
    },

    /// An IV buffer of the wrong length was supplied to the cipher.
    #[error("IV length {actual} does not match expected {expected}")]
    IvLength {
        /// Required IV length.
        expected: usize,
        /// Supplied IV length.
        actual: usize,
    },

    /// The cipher reports a block size other than the one this tool is built for.
    #[error("cipher block size {actual} does not match expected {expected}")]
    BlockSizeMismatch {
        /// Expected block size.
        expected: usize,
        /// Block size reported by the cipher.
        actual: usize,
    },

    /// The cipher produced a different number of bytes than it consumed.
    #[error("cipher produced {actual} bytes for a {expected}-byte chunk")]
    OutputLength {
        /// Input chunk length.
        expected: usize,
        /// Bytes actually produced.
        actual: usize,
    },

    /// A staged chunk exists but its size is not one chunk.
    #[error("staged chunk {path:?} has size {actual}, expected {expected}")]
    StageSize {
        /// Path of the bad stage file.
        path: PathBuf,
        /// Size found on disk.
        actual: u64,
        /// Required size (one chunk).
        expected: u64,
    },

    /// Sparse map entries must be strictly increasing.
    #[error("sparse map entry {next} does not increase over previous entry {prev}")]
    SparseOrder {
        /// The previously read entry.
        prev: u64,
        /// The offending entry.
        next: u64,
    },

    /// The persisted offset is not chunk-aligned (e.g. the chunk size changed between runs).
    #[error("persisted offset {offset} is not aligned to chunk size {chunk_size}")]
    MisalignedOffset {
        /// The offset loaded from the workdir.
        offset: u64,
        /// Configured chunk size in bytes.
        chunk_size: u64,
    },

    /// The persisted offset points past the end of the device.
    #[error("persisted offset {offset} exceeds device size {device_size}")]
    OffsetBeyondDevice {
        /// The offset loaded from the workdir.
        offset: u64,
        /// Device length in bytes.
        device_size: u64,
    },
}
