//! Periodic ETA reporting.
//!
//! Observational only: a report is emitted after at least a gibibyte has
//! been processed since the last byte mark and at least a minute has
//! passed since the last report. Nothing persisted depends on it.

use std::time::{Duration, Instant};

use tracing::info;

const REPORT_BYTES: u64 = 1024 * 1024 * 1024;
const REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Tracks throughput for the current run and logs an ETA estimate.
pub struct ProgressReporter {
    total_bytes: u64,
    processed: u64,
    since_byte_mark: u64,
    started: Instant,
    last_report: Instant,
}

impl ProgressReporter {
    /// Creates a reporter for a run that will process `total_bytes`.
    pub fn new(total_bytes: u64) -> Self {
        let now = Instant::now();
        Self {
            total_bytes,
            processed: 0,
            since_byte_mark: 0,
            started: now,
            last_report: now,
        }
    }

    /// Accounts for `bytes` of processed device data, reporting if both
    /// thresholds have been crossed.
    pub fn record(&mut self, bytes: u64) {
        self.processed += bytes;
        self.since_byte_mark += bytes;

        if self.since_byte_mark < REPORT_BYTES {
            return;
        }
        self.since_byte_mark = 0;

        let now = Instant::now();
        if now.duration_since(self.last_report) < REPORT_INTERVAL {
            return;
        }
        self.last_report = now;

        let elapsed = now.duration_since(self.started).as_secs_f64();
        if elapsed <= 0.0 || self.processed == 0 {
            return;
        }

        let rate = self.processed as f64 / elapsed;
        let remaining = self.total_bytes.saturating_sub(self.processed) as f64 / rate;
        info!("{} left", format_remaining(remaining));
    }

    /// Bytes processed so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }
}

/// Renders a remaining-time estimate in the largest unit whose value stays
/// within bounds: seconds up to 100, minutes up to 90, hours up to 30,
/// days beyond.
pub fn format_remaining(seconds: f64) -> String {
    let mut left = seconds;
    let mut unit = "second(s)";
    if left > 100.0 {
        left /= 60.0;
        unit = "minute(s)";
        if left > 90.0 {
            left /= 60.0;
            unit = "hour(s)";
            if left > 30.0 {
                left /= 24.0;
                unit = "day(s)";
            }
        }
    }
    format!("{left:.1} {unit}")
}
