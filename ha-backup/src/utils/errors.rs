//! Error types for a backup session.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`BackupError`], used by callers to decide
/// how to react (and by the binary to pick an exit code).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Precondition,
    Connectivity,
    Timeout,
    Integrity,
    Remote,
    Io,
}

impl ErrorKind {
    /// Process exit code for this kind of failure.
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Precondition => 2,
            ErrorKind::Connectivity => 3,
            ErrorKind::Timeout => 4,
            ErrorKind::Integrity => 5,
            ErrorKind::Remote | ErrorKind::Io => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Connection failed: {0}")]
    Connectivity(String),

    #[error("{stage}: gave up after {attempts} attempts")]
    Timeout { stage: &'static str, attempts: u32 },

    #[error("Checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Artifact {remote_path} changed during transfer: expected {expected} bytes, read at least {actual}")]
    ArtifactChanged {
        remote_path: String,
        expected: u64,
        actual: u64,
    },

    #[error("Remote command `{command}` failed: {message}")]
    RemoteCommand { command: String, message: String },

    #[error("Reading {remote_path} failed: {source}")]
    RemoteRead {
        remote_path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackupError::Config(_) | BackupError::Precondition(_) => ErrorKind::Precondition,
            BackupError::Connectivity(_) => ErrorKind::Connectivity,
            BackupError::Timeout { .. } => ErrorKind::Timeout,
            BackupError::ChecksumMismatch { .. } | BackupError::ArtifactChanged { .. } => {
                ErrorKind::Integrity
            }
            BackupError::RemoteCommand { .. }
            | BackupError::RemoteRead { .. }
            | BackupError::Ssh(_)
            | BackupError::Http(_)
            | BackupError::Api(_) => ErrorKind::Remote,
            BackupError::Io(_) => ErrorKind::Io,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
