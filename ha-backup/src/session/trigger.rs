//! Pre-flight checks and the backup creation request.

use tracing::info;

use crate::api::ManagementApi;
use crate::config::PathsConfig;
use crate::remote::RemoteHost;
use crate::utils::errors::{BackupError, Result};

pub const BACKUP_DOMAIN: &str = "backup";
pub const BACKUP_ACTION: &str = "create";

/// Check everything that must hold before the remote host is modified.
pub fn validate(
    remote: &mut dyn RemoteHost,
    api: &dyn ManagementApi,
    paths: &PathsConfig,
) -> Result<()> {
    if !paths.destination.is_dir() {
        return Err(BackupError::Precondition(format!(
            "destination {} does not exist or is not a directory",
            paths.destination.display()
        )));
    }

    let entries = remote.list_directory(&paths.config_dir)?;
    if !entries.iter().any(|name| name == &paths.marker_file) {
        return Err(BackupError::Precondition(format!(
            "{} is not a Home Assistant config directory ({} not found)",
            paths.config_dir, paths.marker_file
        )));
    }

    if !api.check_liveness()? {
        return Err(BackupError::Connectivity("management API is not running".into()));
    }

    info!(config_dir = %paths.config_dir, "Pre-flight checks passed");
    Ok(())
}

/// Ask the platform to start a backup. Returns once the request is accepted.
pub fn trigger(api: &dyn ManagementApi) -> Result<()> {
    api.invoke_action(BACKUP_DOMAIN, BACKUP_ACTION)?;
    info!("Backup creation requested");
    Ok(())
}
