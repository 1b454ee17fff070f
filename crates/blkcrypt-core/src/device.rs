//! The device being transformed: positional chunk I/O with direct I/O
//! where the platform and chunk geometry allow it.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::ops::{Deref, DerefMut};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::TransformResult;

/// Alignment required of offsets and buffers for direct I/O.
pub const DIRECT_IO_ALIGN: u64 = 4096;

/// A fixed-size file or block device opened read-write.
///
/// Direct I/O is requested when the chunk size is a multiple of
/// [`DIRECT_IO_ALIGN`]; if the underlying filesystem refuses `O_DIRECT`
/// the device falls back to buffered I/O with explicit fsync.
#[derive(Debug)]
pub struct Device {
    file: File,
    len: u64,
    path: PathBuf,
    direct_io: bool,
}

impl Device {
    /// Opens the device read-write and determines its length.
    pub fn open(path: &Path, chunk_size: u64) -> TransformResult<Self> {
        let want_direct = chunk_size % DIRECT_IO_ALIGN == 0;

        let (mut file, direct_io) = if want_direct {
            match OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_DIRECT)
                .open(path)
            {
                Ok(file) => (file, true),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "direct I/O unavailable, falling back to buffered I/O"
                    );
                    (OpenOptions::new().read(true).write(true).open(path)?, false)
                }
            }
        } else {
            debug!(
                chunk_size,
                "chunk size not aligned for direct I/O, using buffered I/O"
            );
            (OpenOptions::new().read(true).write(true).open(path)?, false)
        };

        // seek-to-end works for both regular files and block devices,
        // where metadata len() reports 0
        let len = file.seek(SeekFrom::End(0))?;

        debug!(path = %path.display(), len, direct_io, "opened device");

        Ok(Self {
            file,
            len,
            path: path.to_path_buf(),
            direct_io,
        })
    }

    /// Device length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns whether the device is zero-length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns whether the device was opened with `O_DIRECT`.
    pub fn is_direct(&self) -> bool {
        self.direct_io
    }

    /// The path the device was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads exactly `buf.len()` bytes at `offset`.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> TransformResult<()> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    /// Writes all of `data` at `offset`.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> TransformResult<()> {
        self.file.write_all_at(data, offset)?;
        Ok(())
    }

    /// Flushes device writes to stable storage.
    pub fn sync(&self) -> TransformResult<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// A byte buffer whose start is aligned for direct I/O.
#[derive(Debug)]
pub(crate) struct AlignedBuf {
    buf: Vec<u8>,
    start: usize,
    len: usize,
}

impl AlignedBuf {
    /// Allocates a zero-filled buffer of `len` bytes aligned to
    /// [`DIRECT_IO_ALIGN`].
    pub(crate) fn zeroed(len: usize) -> Self {
        let align = DIRECT_IO_ALIGN as usize;
        let buf = vec![0u8; len + align];
        let start = buf.as_ptr().align_offset(align).min(align);
        Self { buf, start, len }
    }
}

impl Deref for AlignedBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf[self.start..self.start + self.len]
    }
}

impl DerefMut for AlignedBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.start..self.start + self.len]
    }
}
