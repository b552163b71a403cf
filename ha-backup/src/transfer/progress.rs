//! Byte-level progress for a single artifact transfer.

use std::time::{Duration, Instant};

/// Progress snapshot handed to the observer after every chunk.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Local file name being written
    pub file_name: String,

    /// Artifact size observed when the transfer started
    pub total_bytes: u64,

    pub transferred_bytes: u64,

    /// Average speed since the transfer started, bytes/second
    pub bytes_per_second: u64,

    /// Can exceed 100 only if `total_bytes` was stale
    pub percent_complete: f64,
}

impl TransferProgress {
    pub fn new(file_name: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            file_name: file_name.into(),
            total_bytes,
            transferred_bytes: 0,
            bytes_per_second: 0,
            percent_complete: 0.0,
        }
    }

    pub fn update(&mut self, transferred_bytes: u64) {
        self.transferred_bytes = transferred_bytes;
        self.percent_complete = if self.total_bytes > 0 {
            (self.transferred_bytes as f64 / self.total_bytes as f64) * 100.0
        } else {
            100.0
        };
    }

    pub fn is_complete(&self) -> bool {
        self.transferred_bytes >= self.total_bytes
    }
}

/// Progress tracker with time-based speed calculation
pub struct ProgressTracker {
    start_time: Instant,
    progress: TransferProgress,
}

impl ProgressTracker {
    pub fn new(file_name: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            start_time: Instant::now(),
            progress: TransferProgress::new(file_name, total_bytes),
        }
    }

    /// Record the running byte count and recompute speed.
    pub fn update(&mut self, transferred_bytes: u64) -> &TransferProgress {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.progress.bytes_per_second = (transferred_bytes as f64 / elapsed) as u64;
        }
        self.progress.update(transferred_bytes);
        &self.progress
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn progress(&self) -> &TransferProgress {
        &self.progress
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}
