//! Removal of previously retrieved archives from the remote backup directory.

use tracing::{info, warn};

use super::is_archive;
use crate::remote::{join, shell_quote, RemoteHost};
use crate::utils::errors::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub deleted: Vec<String>,
    pub skipped: Vec<String>,
    /// Archives whose delete command failed
    pub failed: Vec<String>,
}

/// Delete every archive in `dir`. Other entries are left alone. Rotation
/// is best-effort: a failed listing or delete is logged and never stops the
/// session.
pub fn rotate(remote: &mut dyn RemoteHost, dir: &str, extension: &str) -> Result<RotationReport> {
    let mut report = RotationReport::default();
    let entries = match remote.list_directory(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Could not list {}, skipping rotation: {}", dir, e);
            return Ok(report);
        }
    };
    if entries.is_empty() {
        info!("No previous backups in {}", dir);
        return Ok(report);
    }

    for name in entries {
        if !is_archive(&name, extension) {
            warn!("Skipping {}: not a .{} archive", name, extension);
            report.skipped.push(name);
            continue;
        }

        let path = join(dir, &name);
        match remote.execute(&format!("sudo rm -f {}", shell_quote(&path))) {
            Ok(_) => {
                info!(path = %path, "Deleted previous backup");
                report.deleted.push(name);
            }
            Err(e) => {
                warn!(path = %path, "Failed to delete previous backup: {}", e);
                report.failed.push(name);
            }
        }
    }

    Ok(report)
}
