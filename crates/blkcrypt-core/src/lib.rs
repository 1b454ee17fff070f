#![warn(missing_docs)]

//! Resumable, crash-safe, in-place block device encryption.
//!
//! This crate transforms a fixed-size file or block device in place with
//! AES-256-CBC, one chunk at a time, journaling enough state into a
//! working directory that an interrupted run resumes without losing or
//! repeating work. Encryption records all-zero chunks in a sparse map
//! instead of writing their ciphertext; decryption consumes the same map
//! to leave those regions untouched.

pub mod bootstrap;
pub mod chunks;
pub mod cipher;
pub mod device;
pub mod engine;
pub mod error;
pub mod progress;
pub mod sparse;
pub mod workdir;

pub use bootstrap::{prepare, RunOptions, DEFAULT_CHUNK_SIZE};
pub use chunks::ChunkPipeline;
pub use cipher::{ChunkCipher, Direction, BLOCK_LEN, IV_LEN, KEY_LEN};
pub use device::Device;
pub use engine::{EngineConfig, RunSummary, TransformEngine};
pub use error::{TransformError, TransformResult};
pub use progress::ProgressReporter;
pub use sparse::{SparseReader, SparseWriter};
pub use workdir::{OffsetFile, Workdir, IV_NAME, KEY_NAME, SPARSE_NAME};
