//! The transformation engine: the per-chunk state machine that resolves
//! recovery, classifies, transforms, stages, commits, and advances.
//!
//! Crash safety rests on the durability ordering inside each chunk:
//! stage write + fsync happens-before the device write + fsync, which
//! happens-before the offset overwrite + fsync, which happens-before the
//! stage unlink. A crash at any point leaves a state the next run resolves
//! from the persisted offset and, if present, the staged chunk.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chunks::ChunkPipeline;
use crate::cipher::{ChunkCipher, Direction, BLOCK_LEN};
use crate::device::{AlignedBuf, Device};
use crate::error::{TransformError, TransformResult};
use crate::progress::ProgressReporter;
use crate::sparse::{SparseReader, SparseWriter};
use crate::workdir::{final_name, stage_name, OffsetFile, Workdir};

/// Engine configuration, fixed for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Transformation direction.
    pub direction: Direction,
    /// Chunk size in bytes; a positive multiple of the cipher block length.
    pub chunk_size: u64,
    /// When set, workdir side effects still occur but device writes are
    /// suppressed.
    pub dry_run: bool,
}

/// Counters describing a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Direction of the run.
    pub direction: Direction,
    /// Device length in bytes.
    pub device_len: u64,
    /// Offset the run resumed from.
    pub start_offset: u64,
    /// Chunks replayed from a staged file left by an earlier run.
    pub chunks_recovered: u64,
    /// Chunks classified all-zero and skipped.
    pub chunks_zero: u64,
    /// Chunks run through the cipher.
    pub chunks_transformed: u64,
    /// Total bytes processed by this run.
    pub bytes_processed: u64,
    /// Whether the persisted offset already covered the whole device.
    pub already_complete: bool,
}

/// The sparse map in the role the current direction needs: recorded
/// during encryption, consulted during decryption.
enum SparseLog {
    Record(SparseWriter),
    Consult(SparseReader),
}

impl SparseLog {
    fn open(workdir: &Workdir, direction: Direction) -> TransformResult<Self> {
        match direction {
            Direction::Encrypt => Ok(SparseLog::Record(SparseWriter::open(workdir)?)),
            Direction::Decrypt => Ok(SparseLog::Consult(SparseReader::open(workdir)?)),
        }
    }

    fn record(&mut self, offset: u64) -> TransformResult<()> {
        match self {
            SparseLog::Record(writer) => writer.append(offset),
            SparseLog::Consult(_) => Ok(()),
        }
    }

    fn contains(&mut self, offset: u64) -> TransformResult<bool> {
        match self {
            SparseLog::Record(_) => Ok(false),
            SparseLog::Consult(reader) => reader.is_zero_chunk(offset),
        }
    }
}

/// Drives the chunk pipeline over a device, owning the device, the
/// workdir, and the cipher context for the run's duration.
#[derive(Debug)]
pub struct TransformEngine {
    config: EngineConfig,
    device: Device,
    workdir: Workdir,
    cipher: ChunkCipher,
    offset_file: OffsetFile,
    chunk_buf: AlignedBuf,
    scratch: AlignedBuf,
    zeroes: Vec<u8>,
    summary: RunSummary,
}

impl TransformEngine {
    pub(crate) fn new(
        config: EngineConfig,
        device: Device,
        workdir: Workdir,
        cipher: ChunkCipher,
        offset_file: OffsetFile,
    ) -> Self {
        let chunk_len = config.chunk_size as usize;
        let summary = RunSummary {
            direction: config.direction,
            device_len: device.len(),
            start_offset: offset_file.value(),
            chunks_recovered: 0,
            chunks_zero: 0,
            chunks_transformed: 0,
            bytes_processed: 0,
            already_complete: false,
        };

        Self {
            config,
            device,
            workdir,
            cipher,
            offset_file,
            chunk_buf: AlignedBuf::zeroed(chunk_len),
            scratch: AlignedBuf::zeroed(chunk_len + BLOCK_LEN),
            zeroes: vec![0u8; chunk_len],
            summary,
        }
    }

    /// Processes every chunk from the persisted offset to end-of-device.
    ///
    /// Returns immediately when a previous run already covered the device.
    pub fn run(mut self) -> TransformResult<RunSummary> {
        let start = self.offset_file.value();
        let device_len = self.device.len();

        if device_len > 0 && start >= device_len {
            info!(offset = start, device_len, "already done");
            self.summary.already_complete = true;
            return Ok(self.summary);
        }

        let mut sparse = SparseLog::open(&self.workdir, self.config.direction)?;
        let mut progress = ProgressReporter::new(device_len - start);
        let pipeline = ChunkPipeline::new(start, device_len, self.config.chunk_size);

        for offset in pipeline {
            self.process_chunk(offset, &mut sparse)?;
            progress.record(self.config.chunk_size);
        }

        let residual = self.cipher.finish()?;
        if !residual.is_empty() {
            warn!(
                len = residual.len(),
                "cipher finalization produced residual bytes"
            );
            self.workdir.create_durable(
                &final_name(self.config.direction, device_len),
                &residual,
            )?;
        }

        info!(
            direction = %self.config.direction,
            recovered = self.summary.chunks_recovered,
            zero = self.summary.chunks_zero,
            transformed = self.summary.chunks_transformed,
            bytes = self.summary.bytes_processed,
            "success"
        );

        Ok(self.summary)
    }

    fn process_chunk(&mut self, offset: u64, sparse: &mut SparseLog) -> TransformResult<()> {
        let stage = stage_name(self.config.direction, offset);

        // Step R: a staged chunk from an interrupted run wins over
        // everything else; its content is already post-transform.
        if self.workdir.exists(&stage) {
            return self.recover_stage(offset, &stage);
        }

        if self.classify(offset, sparse)? {
            // Step Z: record during encryption, leave the device alone in
            // both directions.
            sparse.record(offset)?;
            self.summary.chunks_zero += 1;
            debug!(offset, "all-zero chunk skipped");
            self.advance(offset, None)
        } else {
            // Step T
            self.transform_chunk(offset, &stage)?;
            self.summary.chunks_transformed += 1;
            self.advance(offset, Some(&stage))
        }
    }

    /// Replays a staged chunk onto the device and commits it.
    fn recover_stage(&mut self, offset: u64, stage: &str) -> TransformResult<()> {
        let chunk_len = self.config.chunk_size as usize;
        let bytes = self.workdir.read(stage)?;
        if bytes.len() != chunk_len {
            return Err(TransformError::StageSize {
                path: self.workdir.artifact_path(stage),
                actual: bytes.len() as u64,
                expected: self.config.chunk_size,
            });
        }

        if !self.config.dry_run {
            self.chunk_buf.copy_from_slice(&bytes);
            self.device.write_at(offset, &self.chunk_buf)?;
            self.device.sync()?;
        }

        info!(offset, "replayed staged chunk");
        self.summary.chunks_recovered += 1;
        self.advance(offset, Some(stage))
    }

    /// Step C: decides whether this chunk is all-zero plaintext.
    fn classify(&mut self, offset: u64, sparse: &mut SparseLog) -> TransformResult<bool> {
        match self.config.direction {
            Direction::Encrypt => {
                self.device.read_at(offset, &mut self.chunk_buf)?;
                Ok(self.chunk_buf[..] == self.zeroes[..])
            }
            Direction::Decrypt => sparse.contains(offset),
        }
    }

    /// Transforms the chunk, stages it durably, then overwrites the device.
    fn transform_chunk(&mut self, offset: u64, stage: &str) -> TransformResult<()> {
        if self.config.direction == Direction::Decrypt {
            self.device.read_at(offset, &mut self.chunk_buf)?;
        }

        let count = self.cipher.transform(&self.chunk_buf, &mut self.scratch)?;
        let output = &self.scratch[..count];

        // durability point: after this flush a crash is recovered by
        // replaying the stage
        self.workdir.create_durable(stage, output)?;

        if !self.config.dry_run {
            self.device.write_at(offset, output)?;
            self.device.sync()?;
        }

        debug!(offset, "transformed chunk");
        Ok(())
    }

    /// Step A: commits the chunk by advancing the offset, then drops any
    /// staged file.
    fn advance(&mut self, offset: u64, stage: Option<&str>) -> TransformResult<()> {
        let next = offset + self.config.chunk_size;

        // commitment point
        self.offset_file.advance(next)?;

        if let Some(stage) = stage {
            // non-fatal: a stale stage is replayed harmlessly by the next
            // run, with content identical to what the device now holds
            if let Err(e) = self.workdir.remove(stage) {
                warn!(stage, error = %e, "failed to unlink staged chunk");
            }
        }

        self.summary.bytes_processed += self.config.chunk_size;
        Ok(())
    }
}
