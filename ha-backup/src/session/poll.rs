//! Attempt-bounded polling for backup creation and stabilization.

use std::time::Duration;
use tracing::{debug, info};

use super::is_archive;
use crate::clock::Clock;
use crate::config::PollingConfig;
use crate::remote::{RemoteHost, RemoteStat};
use crate::utils::errors::{BackupError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready { value: T, attempt: u32 },
    Exhausted { attempts: u32 },
}

/// Run `check` up to `max_attempts` times, sleeping `interval` between
/// attempts (never before the first or after the last). Errors from `check`
/// end polling immediately.
pub fn poll_until<T, F>(
    clock: &dyn Clock,
    interval: Duration,
    max_attempts: u32,
    mut check: F,
) -> Result<PollOutcome<T>>
where
    F: FnMut(u32) -> Result<Option<T>>,
{
    for attempt in 1..=max_attempts {
        if attempt > 1 {
            clock.sleep(interval);
        }
        if let Some(value) = check(attempt)? {
            return Ok(PollOutcome::Ready { value, attempt });
        }
    }
    Ok(PollOutcome::Exhausted {
        attempts: max_attempts,
    })
}

/// Wait until `dir` contains at least one archive. Returns the archive
/// names and the attempt that found them.
pub fn await_creation(
    remote: &mut dyn RemoteHost,
    clock: &dyn Clock,
    polling: &PollingConfig,
    dir: &str,
    extension: &str,
) -> Result<(Vec<String>, u32)> {
    let outcome = poll_until(clock, polling.interval(), polling.creation_attempts, |attempt| {
        let archives: Vec<String> = remote
            .list_directory(dir)?
            .into_iter()
            .filter(|name| is_archive(name, extension))
            .collect();
        debug!(attempt, found = archives.len(), "Checked for new backup");
        Ok((!archives.is_empty()).then_some(archives))
    })?;

    match outcome {
        PollOutcome::Ready { value, attempt } => {
            info!(attempt, "Backup created: {}", value.join(", "));
            Ok((value, attempt))
        }
        PollOutcome::Exhausted { attempts } => Err(BackupError::Timeout {
            stage: "backup creation",
            attempts,
        }),
    }
}

/// Wait until two consecutive size samples of `path` are equal and
/// non-zero. Returns the last stat and the attempt it was taken on.
pub fn await_stabilization(
    remote: &mut dyn RemoteHost,
    clock: &dyn Clock,
    polling: &PollingConfig,
    path: &str,
) -> Result<(RemoteStat, u32)> {
    let mut last_size: Option<u64> = None;
    let outcome = poll_until(
        clock,
        polling.interval(),
        polling.stabilization_attempts,
        |attempt| {
            let stat = remote.open_for_read(path)?.stat()?;
            debug!(attempt, size = stat.size, previous = ?last_size, "Sampled backup size");
            if stat.size > 0 && last_size == Some(stat.size) {
                return Ok(Some(stat));
            }
            last_size = Some(stat.size);
            Ok(None)
        },
    )?;

    match outcome {
        PollOutcome::Ready { value, attempt } => {
            info!(attempt, size = value.size, "Backup {} is stable", path);
            Ok((value, attempt))
        }
        PollOutcome::Exhausted { attempts } => Err(BackupError::Timeout {
            stage: "backup stabilization",
            attempts,
        }),
    }
}
