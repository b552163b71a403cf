//! Completion timestamp pushed to the status entity.

use chrono::{DateTime, Local};
use std::fmt::Write;
use tracing::{info, warn};

use crate::api::ManagementApi;
use crate::config::StatusConfig;

/// Set the status entity to `now`. Every failure here is logged and
/// reported as `false`; it never fails the session.
pub fn report_status(api: &dyn ManagementApi, status: &StatusConfig, now: DateTime<Local>) -> bool {
    let catalog = match api.list_entities() {
        Ok(catalog) => catalog,
        Err(e) => {
            warn!("Could not fetch entities, status not reported: {}", e);
            return false;
        }
    };

    let Some(entity) = catalog.get(&status.entity_id) else {
        warn!("Status entity {} not found, skipping", status.entity_id);
        return false;
    };

    let mut stamp = String::new();
    if write!(stamp, "{}", now.format(&status.timestamp_format)).is_err() {
        warn!("Invalid timestamp format {:?}", status.timestamp_format);
        return false;
    }

    let mut entity = entity.clone();
    entity.set_state(stamp);
    match api.update_entity(&entity) {
        Ok(()) => {
            info!(entity = %entity.entity_id, state = %entity.state, "Backup status updated");
            true
        }
        Err(e) => {
            warn!("Failed to update {}: {}", entity.entity_id, e);
            false
        }
    }
}
