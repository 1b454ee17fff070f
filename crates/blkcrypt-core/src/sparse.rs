//! The sparse map: an append-only log of device offsets whose plaintext
//! is all zero.
//!
//! Encryption appends to it and skips the device write for those chunks;
//! decryption reads it to learn which regions hold no ciphertext and must
//! be left untouched. Entries are 8-byte big-endian offsets and strictly
//! increasing.

use std::fs::OpenOptions;
use std::io::{BufReader, Read, Write};
use std::os::unix::fs::FileExt as _;

use tracing::{debug, warn};

use crate::error::{TransformError, TransformResult};
use crate::workdir::{Workdir, SPARSE_NAME};

const ENTRY_LEN: u64 = 8;

/// Appender used by encryption runs.
///
/// On open the writer repairs a torn trailing entry and loads the last
/// persisted offset; appends at or below that offset are dropped, so a
/// chunk reclassified after a crash between the sparse append and the
/// offset advance cannot produce a duplicate entry.
pub struct SparseWriter {
    file: std::fs::File,
    last: Option<u64>,
}

impl SparseWriter {
    /// Opens (creating if necessary) the sparse map for appending.
    pub fn open(workdir: &Workdir) -> TransformResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(workdir.artifact_path(SPARSE_NAME))?;

        let mut size = file.metadata()?.len();
        let torn = size % ENTRY_LEN;
        if torn != 0 {
            warn!(torn, "truncating torn trailing sparse entry");
            size -= torn;
            file.set_len(size)?;
            file.sync_all()?;
        }

        let last = if size >= ENTRY_LEN {
            let mut buf = [0u8; ENTRY_LEN as usize];
            file.read_exact_at(&mut buf, size - ENTRY_LEN)?;
            Some(u64::from_be_bytes(buf))
        } else {
            None
        };

        debug!(?last, entries = size / ENTRY_LEN, "opened sparse map for append");

        Ok(Self { file, last })
    }

    /// Records `offset` as an all-zero chunk and flushes the map.
    pub fn append(&mut self, offset: u64) -> TransformResult<()> {
        if let Some(last) = self.last {
            if offset <= last {
                debug!(offset, last, "sparse entry already recorded");
                return Ok(());
            }
        }

        self.file.write_all(&offset.to_be_bytes())?;
        self.file.sync_all()?;
        self.last = Some(offset);
        Ok(())
    }

    /// The highest offset recorded so far.
    pub fn last(&self) -> Option<u64> {
        self.last
    }
}

/// Sequential reader used by decryption runs.
///
/// Chunks are queried in increasing offset order, so a single cursor with
/// one buffered entry answers each query in O(1) amortized.
pub struct SparseReader {
    reader: BufReader<std::fs::File>,
    pending: Option<u64>,
    prev: Option<u64>,
}

impl SparseReader {
    /// Opens the sparse map for sequential consumption, creating it empty
    /// if no encryption run has produced one.
    pub fn open(workdir: &Workdir) -> TransformResult<Self> {
        if !workdir.exists(SPARSE_NAME) {
            workdir.create_durable(SPARSE_NAME, &[])?;
        }

        let file = std::fs::File::open(workdir.artifact_path(SPARSE_NAME))?;
        Ok(Self {
            reader: BufReader::new(file),
            pending: None,
            prev: None,
        })
    }

    fn next_entry(&mut self) -> TransformResult<Option<u64>> {
        let mut buf = [0u8; ENTRY_LEN as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        if filled < buf.len() {
            warn!(filled, "ignoring torn trailing sparse entry");
            return Ok(None);
        }

        let entry = u64::from_be_bytes(buf);
        if let Some(prev) = self.prev {
            if entry <= prev {
                return Err(TransformError::SparseOrder { prev, next: entry });
            }
        }
        self.prev = Some(entry);
        Ok(Some(entry))
    }

    /// Returns whether the chunk at `offset` was recorded as all-zero
    /// plaintext, advancing the cursor past any smaller entries.
    pub fn is_zero_chunk(&mut self, offset: u64) -> TransformResult<bool> {
        loop {
            if self.pending.is_none() {
                self.pending = self.next_entry()?;
            }
            let Some(entry) = self.pending else {
                return Ok(false);
            };

            if entry < offset {
                self.pending = None;
                continue;
            }
            if entry == offset {
                self.pending = None;
                return Ok(true);
            }
            return Ok(false);
        }
    }
}
