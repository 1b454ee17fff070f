//! Run preparation: input validation, key material, persisted state, and
//! engine construction.
//!
//! Everything here happens before any state change on the device, and all
//! validation failures are reported without touching it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::cipher::{ChunkCipher, Direction, BLOCK_LEN, IV_LEN, KEY_LEN};
use crate::device::Device;
use crate::engine::{EngineConfig, TransformEngine};
use crate::error::{TransformError, TransformResult};
use crate::workdir::{OffsetFile, Workdir, IV_NAME, KEY_NAME};

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: u64 = 4096;

/// Everything a single run needs to know.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Device or file to transform in place.
    pub device: PathBuf,
    /// Existing writable directory for durable state.
    pub workdir: PathBuf,
    /// Transformation direction.
    pub direction: Direction,
    /// Chunk size in bytes; must be a positive multiple of the cipher
    /// block length.
    pub chunk_size: u64,
    /// Suppress device writes while keeping all workdir side effects.
    pub dry_run: bool,
}

/// Validates the options, materializes or loads the workdir artifacts, and
/// builds the engine.
///
/// Encryption creates `.iv` and `.key` on first need; decryption requires
/// both to pre-exist. The persisted offset must be chunk-aligned and
/// within the device.
pub fn prepare(options: RunOptions) -> TransformResult<TransformEngine> {
    if options.chunk_size == 0 || options.chunk_size % BLOCK_LEN as u64 != 0 {
        return Err(TransformError::InvalidChunkSize {
            chunk_size: options.chunk_size,
            block_len: BLOCK_LEN as u64,
        });
    }

    let device = Device::open(&options.device, options.chunk_size)?;
    if device.len() % options.chunk_size != 0 {
        return Err(TransformError::MisalignedDevice {
            device_size: device.len(),
            chunk_size: options.chunk_size,
        });
    }

    let workdir = Workdir::open(&options.workdir)?;

    if !workdir.exists(IV_NAME) || !workdir.exists(KEY_NAME) {
        if options.direction == Direction::Decrypt {
            return Err(TransformError::MissingKeyMaterial);
        }
        workdir.ensure_random(IV_NAME, IV_LEN)?;
        workdir.ensure_random(KEY_NAME, KEY_LEN)?;
        info!(workdir = %workdir.root().display(), "generated key material");
    }

    let iv = workdir.read_sized(IV_NAME, IV_LEN as u64)?;
    let key = Zeroizing::new(workdir.read_sized(KEY_NAME, KEY_LEN as u64)?);
    let cipher = ChunkCipher::new(options.direction, &key, &iv)?;

    let offset_file = OffsetFile::open(&workdir, options.direction)?;
    let offset = offset_file.value();
    if offset % options.chunk_size != 0 {
        return Err(TransformError::MisalignedOffset {
            offset,
            chunk_size: options.chunk_size,
        });
    }
    if offset > device.len() {
        return Err(TransformError::OffsetBeyondDevice {
            offset,
            device_size: device.len(),
        });
    }

    debug!(
        direction = %options.direction,
        device = %options.device.display(),
        device_len = device.len(),
        chunk_size = options.chunk_size,
        offset,
        dry_run = options.dry_run,
        "prepared run"
    );

    let config = EngineConfig {
        direction: options.direction,
        chunk_size: options.chunk_size,
        dry_run: options.dry_run,
    };

    Ok(TransformEngine::new(
        config,
        device,
        workdir,
        cipher,
        offset_file,
    ))
}
