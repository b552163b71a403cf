//! Remote command/file interface to the managed host.
//!
//! The session only talks to the host through [`RemoteHost`], so the SSH
//! implementation can be swapped for an in-memory one in tests.

pub mod ssh;

use std::io::Read;

use crate::utils::errors::Result;

pub use ssh::SshRemote;

/// Size and modification time of a remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStat {
    pub size: u64,
    /// Seconds since the Unix epoch
    pub modified: i64,
}

/// One backup artifact on the remote host, as last observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBackupFile {
    pub remote_path: String,
    /// File name within the backup directory
    pub name: String,
    pub size: u64,
    pub modified: i64,
}

/// A remote file opened for sequential reading.
pub trait RemoteFile: Read {
    fn stat(&mut self) -> Result<RemoteStat>;
}

pub trait RemoteHost {
    /// Names of the entries in `path`, sorted. A missing directory lists as empty.
    fn list_directory(&mut self, path: &str) -> Result<Vec<String>>;

    /// Run a shell command and return its non-empty output lines.
    ///
    /// Commands starting with `sudo ` are run with elevated privileges.
    fn execute(&mut self, command: &str) -> Result<Vec<String>>;

    fn open_for_read(&mut self, path: &str) -> Result<Box<dyn RemoteFile>>;
}

/// Join a remote (POSIX) directory and entry name.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", dir.trim_end_matches('/'), name.trim_start_matches('/'))
}

/// Quote a value for interpolation into a POSIX shell command.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
