//! Streaming transfer of a stable artifact with end-to-end checksum
//! verification.
//!
//! A transfer runs in two steps mirroring the session phases:
//! [`TransferVerifier::stream`] copies the bytes and yields a
//! [`PendingTransfer`]; [`PendingTransfer::verify`] compares checksums and
//! either commits the local file or deletes it.

pub mod checksum;
pub mod progress;

use chrono::{Local, TimeZone};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::TransferConfig;
use crate::remote::{shell_quote, RemoteBackupFile, RemoteHost};
use crate::utils::errors::{BackupError, Result};
use checksum::RunningChecksum;
use progress::{format_bytes, format_speed, ProgressTracker, TransferProgress};

/// Local file name for an artifact: its modification time as
/// `YYYYMMDDHHMMSS` plus the remote file's extension.
pub fn local_file_name(modified: i64, remote_name: &str) -> Result<String> {
    let timestamp = Local.timestamp_opt(modified, 0).earliest().ok_or_else(|| {
        BackupError::Precondition(format!("invalid modification time {modified} for {remote_name}"))
    })?;
    let stamp = timestamp.format("%Y%m%d%H%M%S");

    Ok(match Path::new(remote_name).extension() {
        Some(ext) => format!("{}.{}", stamp, ext.to_string_lossy()),
        None => stamp.to_string(),
    })
}

/// State of one file's transfer.
pub struct TransferRecord {
    pub remote_path: String,
    pub local_path: PathBuf,
    pub bytes_written: u64,
    pub source_checksum: String,
    destination_checksum: RunningChecksum,
}

/// Outcome of a committed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    pub remote_path: String,
    pub local_path: PathBuf,
    pub bytes: u64,
    pub checksum: String,
    pub duration: Duration,
}

/// Local file that is removed unless explicitly committed.
struct PartialFile {
    path: PathBuf,
    file: Option<File>,
    committed: bool,
}

impl PartialFile {
    fn create(path: PathBuf) -> Result<Self> {
        // Never overwrites; a name collision with an earlier artifact of the
        // same run is a Precondition error too.
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => BackupError::Precondition(format!(
                    "{} already exists, refusing to overwrite",
                    path.display()
                )),
                _ => BackupError::Io(e),
            })?;
        Ok(Self {
            path,
            file: Some(file),
            committed: false,
        })
    }

    /// Write and flush one chunk.
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(chunk)?;
            file.flush()?;
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.sync_all()?;
        }
        Ok(())
    }

    fn commit(mut self) {
        self.file.take();
        self.committed = true;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        self.file.take();
        if !self.committed {
            match std::fs::remove_file(&self.path) {
                Ok(()) => info!(path = %self.path.display(), "Deleted incomplete local file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %self.path.display(), "Could not delete incomplete local file: {}", e),
            }
        }
    }
}

/// Bytes streamed to disk, awaiting checksum comparison.
pub struct PendingTransfer {
    record: TransferRecord,
    file: PartialFile,
    duration: Duration,
}

impl PendingTransfer {
    pub fn record(&self) -> &TransferRecord {
        &self.record
    }

    /// Compare source and destination checksums. On mismatch the local file
    /// is deleted before the error is returned.
    pub fn verify(self) -> Result<TransferSummary> {
        let PendingTransfer {
            record,
            file,
            duration,
        } = self;
        let destination = record.destination_checksum.finalize_hex();

        if destination != record.source_checksum {
            error!(
                local = %record.local_path.display(),
                source = %record.source_checksum,
                destination = %destination,
                "Checksum NOT matching"
            );
            drop(file);
            return Err(BackupError::ChecksumMismatch {
                path: record.local_path,
                expected: record.source_checksum,
                actual: destination,
            });
        }

        file.commit();
        info!(local = %record.local_path.display(), checksum = %destination, "Checksum matching, backup transferred");

        Ok(TransferSummary {
            remote_path: record.remote_path,
            local_path: record.local_path,
            bytes: record.bytes_written,
            checksum: destination,
            duration,
        })
    }
}

pub struct TransferVerifier<'c> {
    config: &'c TransferConfig,
    destination_dir: &'c Path,
}

impl<'c> TransferVerifier<'c> {
    pub fn new(config: &'c TransferConfig, destination_dir: &'c Path) -> Self {
        Self {
            config,
            destination_dir,
        }
    }

    /// Checksum of the artifact as computed on the remote host.
    pub fn source_checksum(
        &self,
        remote: &mut dyn RemoteHost,
        artifact: &RemoteBackupFile,
    ) -> Result<String> {
        let algorithm = self.config.checksum;
        let command = format!(
            "{} -b {}",
            algorithm.remote_command(),
            shell_quote(&artifact.remote_path)
        );
        let lines = remote.execute(&command)?;
        algorithm
            .parse_remote_output(&lines)
            .ok_or_else(|| BackupError::RemoteCommand {
                command,
                message: format!("unexpected {} output: {:?}", algorithm.as_str(), lines),
            })
    }

    /// Copy `artifact` into the destination directory chunk by chunk.
    ///
    /// `artifact.size` is the size observed at stabilization; reading past
    /// it means the file changed and aborts the transfer.
    pub fn stream(
        &self,
        remote: &mut dyn RemoteHost,
        artifact: &RemoteBackupFile,
        observer: &mut dyn FnMut(&TransferProgress),
    ) -> Result<PendingTransfer> {
        let source_checksum = self.source_checksum(remote, artifact)?;

        let mut reader = remote.open_for_read(&artifact.remote_path)?;
        let stat = reader.stat()?;
        let file_name = local_file_name(stat.modified, &artifact.name)?;
        let local_path = self.destination_dir.join(&file_name);

        let mut file = PartialFile::create(local_path.clone())?;
        info!(remote = %artifact.remote_path, local = %local_path.display(), size = stat.size, "Transferring backup");

        let mut record = TransferRecord {
            remote_path: artifact.remote_path.clone(),
            local_path,
            bytes_written: 0,
            source_checksum,
            destination_checksum: self.config.checksum.hasher(),
        };
        let mut tracker = ProgressTracker::new(file_name, stat.size);
        observer(tracker.progress());

        let mut buf = vec![0u8; self.config.chunk_size];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(BackupError::RemoteRead {
                        remote_path: artifact.remote_path.clone(),
                        source: e,
                    })
                }
            };

            let written = record.bytes_written + n as u64;
            if written > artifact.size {
                return Err(BackupError::ArtifactChanged {
                    remote_path: artifact.remote_path.clone(),
                    expected: artifact.size,
                    actual: written,
                });
            }

            let chunk = &buf[..n];
            file.write_chunk(chunk)?;
            // Only bytes already flushed to disk reach the checksum.
            record.destination_checksum.update(chunk);
            record.bytes_written = written;
            observer(tracker.update(written));
        }
        file.sync()?;

        let duration = tracker.elapsed();
        info!(
            "Transferred {} in {:.1}s ({})",
            format_bytes(record.bytes_written),
            duration.as_secs_f64(),
            format_speed(tracker.progress().bytes_per_second)
        );

        Ok(PendingTransfer {
            record,
            file,
            duration,
        })
    }
}
