//! Utility modules shared by the session stages and the binary.

pub mod errors;
pub mod logger;

pub use errors::{BackupError, ErrorKind, Result};
