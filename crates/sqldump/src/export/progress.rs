//! Per-stage progress counters.
//!
//! Shared between the three pipeline stages; all counters are atomic adds
//! and the reporter is the only mutable state the stages share.

use std::sync::atomic::{AtomicU64, Ordering};

/// Aggregated pipeline counters.
#[derive(Debug, Default)]
pub struct ProgressReporter {
    rows_read: AtomicU64,
    rows_transformed: AtomicU64,
    rows_written: AtomicU64,
    bytes_written: AtomicU64,
}

/// A point-in-time view of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub rows_read: u64,
    pub rows_transformed: u64,
    pub rows_written: u64,
    pub bytes_written: u64,
}

impl ProgressReporter {
    /// Create a reporter with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_read(&self, rows: u64) {
        self.rows_read.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn add_transformed(&self, rows: u64) {
        self.rows_transformed.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn add_written(&self, rows: u64) {
        self.rows_written.fetch_add(rows, Ordering::Relaxed);
    }

    /// Record the writer's monotonic byte counter.
    pub fn record_bytes(&self, bytes: u64) {
        self.bytes_written.store(bytes, Ordering::Relaxed);
    }

    /// Snapshot all counters.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            rows_read: self.rows_read.load(Ordering::Relaxed),
            rows_transformed: self.rows_transformed.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let progress = ProgressReporter::new();
        progress.add_read(10);
        progress.add_read(5);
        progress.add_transformed(12);
        progress.add_written(8);
        progress.record_bytes(1024);

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.rows_read, 15);
        assert_eq!(snapshot.rows_transformed, 12);
        assert_eq!(snapshot.rows_written, 8);
        assert_eq!(snapshot.bytes_written, 1024);
    }
}
