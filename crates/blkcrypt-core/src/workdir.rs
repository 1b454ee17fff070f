//! Durable workdir artifacts: IV, key, per-mode offset, staged chunks,
//! and the sparse map file.
//!
//! Every write is followed by a synchronous flush before the operation is
//! reported successful. New artifacts are materialized through a
//! write-then-rename so a crash leaves either the old state or the fully
//! written new one, never a torn file; the directory is flushed after the
//! rename so a committed artifact survives power loss.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt as _;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use crate::cipher::Direction;
use crate::error::{TransformError, TransformResult};

/// Artifact holding the CBC initialization vector.
pub const IV_NAME: &str = ".iv";
/// Artifact holding the AES-256 key.
pub const KEY_NAME: &str = ".key";
/// The sparse map artifact; always tagged with the encryption mode since
/// it is written by encryption and consumed by decryption.
pub const SPARSE_NAME: &str = "enc_sparse";

const LOCK_NAME: &str = ".lock";

/// Name of the per-mode offset artifact.
pub fn offset_name(direction: Direction) -> String {
    format!("{}_offset", direction.tag())
}

/// Name of the staged-chunk artifact for the chunk at `offset`.
pub fn stage_name(direction: Direction, offset: u64) -> String {
    format!("{}_chunk-{}", direction.tag(), offset)
}

/// Name of the diagnostic artifact holding residual cipher output.
pub fn final_name(direction: Direction, offset: u64) -> String {
    format!("{}_chunk-{}.final", direction.tag(), offset)
}

/// An exclusively held working directory.
///
/// Holds an advisory lock on `.lock` for its whole lifetime so two
/// processes cannot interleave commits on the same workdir.
#[derive(Debug)]
pub struct Workdir {
    root: PathBuf,
    _lock: File,
}

impl Workdir {
    /// Opens an existing directory and takes the workdir lock.
    pub fn open(root: &Path) -> TransformResult<Self> {
        let meta = fs::metadata(root)?;
        if !meta.is_dir() {
            return Err(TransformError::NotADirectory {
                path: root.to_path_buf(),
            });
        }

        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(root.join(LOCK_NAME))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(TransformError::WorkdirLocked {
                path: root.to_path_buf(),
            });
        }

        debug!(workdir = %root.display(), "locked workdir");

        Ok(Self {
            root: root.to_path_buf(),
            _lock: lock,
        })
    }

    /// The workdir root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path of a named artifact.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Returns whether the named artifact exists.
    pub fn exists(&self, name: &str) -> bool {
        self.artifact_path(name).exists()
    }

    /// Creates an artifact with the given contents, durably.
    ///
    /// The bytes are written to a temporary sibling, flushed, renamed into
    /// place, and the directory is flushed.
    pub fn create_durable(&self, name: &str, contents: &[u8]) -> TransformResult<()> {
        let tmp_name = format!("{name}.tmp");
        let tmp_path = self.artifact_path(&tmp_name);

        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(contents)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, self.artifact_path(name))?;
        self.sync_dir()?;

        debug!(artifact = name, len = contents.len(), "created artifact");
        Ok(())
    }

    /// Creates the named artifact with `len` cryptographically random bytes
    /// if it does not exist yet. Existing artifacts are never rewritten.
    pub fn ensure_random(&self, name: &str, len: usize) -> TransformResult<()> {
        if self.exists(name) {
            return Ok(());
        }
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        self.create_durable(name, &bytes)
    }

    /// Reads an artifact fully into memory.
    pub fn read(&self, name: &str) -> TransformResult<Vec<u8>> {
        Ok(fs::read(self.artifact_path(name))?)
    }

    /// Reads an artifact and enforces its exact size.
    pub fn read_sized(&self, name: &str, expected: u64) -> TransformResult<Vec<u8>> {
        let bytes = self.read(name)?;
        if bytes.len() as u64 != expected {
            return Err(TransformError::ArtifactSize {
                name: name.to_string(),
                actual: bytes.len() as u64,
                expected,
            });
        }
        Ok(bytes)
    }

    /// Removes the named artifact.
    pub fn remove(&self, name: &str) -> std::io::Result<()> {
        fs::remove_file(self.artifact_path(name))
    }

    fn sync_dir(&self) -> TransformResult<()> {
        File::open(&self.root)?.sync_all()?;
        Ok(())
    }
}

/// The persisted per-mode device offset: 8 bytes, big-endian, overwritten
/// in place and flushed on every advance. The flush of this file is the
/// commitment point for a chunk.
#[derive(Debug)]
pub struct OffsetFile {
    file: File,
    value: u64,
}

impl OffsetFile {
    /// Opens the offset artifact for the given mode, creating it at zero
    /// on the first run.
    pub fn open(workdir: &Workdir, direction: Direction) -> TransformResult<Self> {
        let name = offset_name(direction);
        if !workdir.exists(&name) {
            workdir.create_durable(&name, &0u64.to_be_bytes())?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(workdir.artifact_path(&name))?;

        let size = file.metadata()?.len();
        if size != 8 {
            return Err(TransformError::ArtifactSize {
                name,
                actual: size,
                expected: 8,
            });
        }

        let mut buf = [0u8; 8];
        file.read_exact_at(&mut buf, 0)?;

        Ok(Self {
            file,
            value: u64::from_be_bytes(buf),
        })
    }

    /// The currently persisted offset.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Overwrites the offset with `next` and flushes it.
    pub fn advance(&mut self, next: u64) -> TransformResult<()> {
        self.file.write_all_at(&next.to_be_bytes(), 0)?;
        self.file.sync_all()?;
        self.value = next;
        Ok(())
    }
}
