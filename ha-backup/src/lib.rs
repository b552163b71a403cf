//! Home Assistant backup retrieval library
//!
//! Rotates old archives on the managed host, triggers a new backup, waits for
//! it to finish writing, pulls it over SFTP with checksum verification and
//! records the completion time back on the platform.

pub mod api;
pub mod clock;
pub mod config;
pub mod remote;
pub mod session;
pub mod transfer;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::Config;
pub use session::{BackupSession, Phase, SessionReport};
pub use utils::errors::{BackupError, ErrorKind};
pub type Result<T> = std::result::Result<T, BackupError>;
