//! One backup session: validate, rotate, trigger, await the new archive,
//! transfer and verify it, report completion.

pub mod poll;
pub mod report;
pub mod rotate;
pub mod trigger;

use tracing::{debug, error, info};

use crate::api::ManagementApi;
use crate::clock::Clock;
use crate::config::Config;
use crate::remote::{join, RemoteBackupFile, RemoteHost};
use crate::transfer::progress::TransferProgress;
use crate::transfer::{TransferSummary, TransferVerifier};
use crate::utils::errors::{BackupError, Result};
use rotate::RotationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Validating,
    Rotating,
    Triggering,
    AwaitingCreation,
    AwaitingStabilization,
    Transferring,
    Verifying,
    Reporting,
    Done,
    Failed,
}

/// Attempt number on which each polling stage succeeded (0 = not reached).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptCounters {
    pub creation: u32,
    pub stabilization: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    pub rotated: Vec<String>,
    pub skipped: Vec<String>,
    pub creation_attempts: u32,
    pub transfers: Vec<TransferSummary>,
    pub status_reported: bool,
}

/// True when `name` ends with `.<extension>`.
pub(crate) fn is_archive(name: &str, extension: &str) -> bool {
    name.strip_suffix(extension)
        .is_some_and(|stem| stem.ends_with('.'))
}

type ProgressObserver<'a> = Box<dyn FnMut(&TransferProgress) + 'a>;

pub struct BackupSession<'a> {
    config: &'a Config,
    remote: &'a mut dyn RemoteHost,
    api: &'a dyn ManagementApi,
    clock: &'a dyn Clock,
    observer: Option<ProgressObserver<'a>>,
    phase: Phase,
    artifact: Option<RemoteBackupFile>,
    attempts: AttemptCounters,
}

impl<'a> BackupSession<'a> {
    pub fn new(
        config: &'a Config,
        remote: &'a mut dyn RemoteHost,
        api: &'a dyn ManagementApi,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            config,
            remote,
            api,
            clock,
            observer: None,
            phase: Phase::Validating,
            artifact: None,
            attempts: AttemptCounters::default(),
        }
    }

    /// Receive a progress snapshot after every transferred chunk.
    pub fn with_progress(mut self, observer: impl FnMut(&TransferProgress) + 'a) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn attempts(&self) -> AttemptCounters {
        self.attempts
    }

    /// The artifact currently (or last) being handled.
    pub fn artifact(&self) -> Option<&RemoteBackupFile> {
        self.artifact.as_ref()
    }

    /// Run the session to completion. Ends in [`Phase::Done`] or
    /// [`Phase::Failed`].
    pub fn run(&mut self) -> Result<SessionReport> {
        match self.execute() {
            Ok(report) => {
                self.phase = Phase::Done;
                info!(
                    transferred = report.transfers.len(),
                    status_reported = report.status_reported,
                    "Backup session finished"
                );
                Ok(report)
            }
            Err(e) => {
                error!(phase = ?self.phase, "Backup session failed: {}", e);
                self.phase = Phase::Failed;
                Err(e)
            }
        }
    }

    fn execute(&mut self) -> Result<SessionReport> {
        let config = self.config;
        let backups_dir = config.paths.remote_backups_dir();
        let extension = config.transfer.archive_extension.as_str();

        if self.phase != Phase::Validating {
            return Err(BackupError::Precondition(format!(
                "session already ran (phase {:?})",
                self.phase
            )));
        }
        trigger::validate(&mut *self.remote, self.api, &config.paths)?;

        self.enter(Phase::Rotating)?;
        let rotation = self.rotate(&backups_dir)?;

        self.enter(Phase::Triggering)?;
        trigger::trigger(self.api)?;

        self.enter(Phase::AwaitingCreation)?;
        let (archives, attempt) = poll::await_creation(
            &mut *self.remote,
            self.clock,
            &config.polling,
            &backups_dir,
            extension,
        )?;
        self.attempts.creation = attempt;

        let verifier = TransferVerifier::new(&config.transfer, &config.paths.destination);
        let mut transfers = Vec::with_capacity(archives.len());
        for name in archives {
            self.enter(Phase::AwaitingStabilization)?;
            let remote_path = join(&backups_dir, &name);
            let (stat, attempt) = poll::await_stabilization(
                &mut *self.remote,
                self.clock,
                &config.polling,
                &remote_path,
            )?;
            self.attempts.stabilization = attempt;
            let artifact = RemoteBackupFile {
                remote_path,
                name,
                size: stat.size,
                modified: stat.modified,
            };
            self.artifact = Some(artifact.clone());

            self.enter(Phase::Transferring)?;
            let mut noop = |_: &TransferProgress| {};
            let observer: &mut dyn FnMut(&TransferProgress) = match self.observer.as_mut() {
                Some(observer) => observer.as_mut(),
                None => &mut noop,
            };
            let pending = verifier.stream(&mut *self.remote, &artifact, observer)?;

            self.enter(Phase::Verifying)?;
            transfers.push(pending.verify()?);
        }

        self.enter(Phase::Reporting)?;
        let status_reported = report::report_status(self.api, &config.status, self.clock.now());

        Ok(SessionReport {
            rotated: rotation.deleted,
            skipped: rotation.skipped,
            creation_attempts: self.attempts.creation,
            transfers,
            status_reported,
        })
    }

    /// Move to `next`. Phases only advance, except that a verified artifact
    /// hands over to stabilization of the next one.
    fn enter(&mut self, next: Phase) -> Result<()> {
        let allowed = next > self.phase
            || (self.phase == Phase::Verifying && next == Phase::AwaitingStabilization);
        if !allowed {
            return Err(BackupError::Precondition(format!(
                "invalid phase transition {:?} -> {:?}",
                self.phase, next
            )));
        }
        debug!(from = ?self.phase, to = ?next, "Session phase");
        self.phase = next;
        Ok(())
    }

    fn rotate(&mut self, backups_dir: &str) -> Result<RotationReport> {
        if self.phase != Phase::Rotating {
            return Err(BackupError::Precondition(format!(
                "rotation is not allowed in phase {:?}",
                self.phase
            )));
        }
        rotate::rotate(
            &mut *self.remote,
            backups_dir,
            &self.config.transfer.archive_extension,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{local_timestamp, FakeApi, FakeRemote, ManualClock};
    use crate::utils::errors::ErrorKind;
    use std::time::Duration;
    use tempfile::TempDir;

    const CONFIG_DIR: &str = "/config";
    const BACKUPS: &str = "/config/backups";
    const NEW_BACKUP: &str = "/config/backups/backup2.tar";
    const STATUS_ENTITY: &str = "input_datetime.backup_last";

    fn config(destination: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.paths.config_dir = CONFIG_DIR.into();
        config.paths.destination = destination.to_path_buf();
        config
    }

    fn payload() -> Vec<u8> {
        (0..1000u32).map(|i| (i * 7 % 256) as u8).collect()
    }

    /// Old backup plus a stray file; the new backup shows up on the second poll.
    fn scripted_remote() -> FakeRemote {
        FakeRemote::default()
            .with_listings(CONFIG_DIR, &[&["backups", "configuration.yaml"]])
            .with_listings(
                BACKUPS,
                &[
                    &["backup1.tar", "note.txt"],
                    &["note.txt"],
                    &["backup2.tar", "note.txt"],
                ],
            )
            .with_sizes(NEW_BACKUP, &[1000, 1000])
            .with_file(NEW_BACKUP, payload(), local_timestamp(2024, 1, 1, 12, 0, 0))
    }

    #[test]
    fn test_is_archive() {
        assert!(is_archive("backup1.tar", "tar"));
        assert!(!is_archive("note.txt", "tar"));
        assert!(!is_archive("backup.tar.gz", "tar"));
        assert!(!is_archive("footar", "tar"));
        assert!(is_archive(".tar", "tar"));
    }

    #[test]
    fn test_end_to_end_session() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let mut remote = scripted_remote();
        let api = FakeApi::default().with_entity(STATUS_ENTITY, "2023-12-01 00-00-00");
        let clock = ManualClock::default();
        let mut progress = Vec::new();

        let (report, phase, attempts) = {
            let mut session = BackupSession::new(&config, &mut remote, &api, &clock)
                .with_progress(|p| progress.push(p.transferred_bytes));
            let report = session.run().unwrap();
            (report, session.phase(), session.attempts())
        };

        assert_eq!(phase, Phase::Done);
        assert_eq!(report.rotated, vec!["backup1.tar"]);
        assert_eq!(report.skipped, vec!["note.txt"]);
        assert_eq!(remote.deleted(), vec!["/config/backups/backup1.tar"]);
        assert_eq!(*api.actions.borrow(), vec![("backup".to_string(), "create".to_string())]);

        assert_eq!(report.creation_attempts, 2);
        assert_eq!(attempts, AttemptCounters { creation: 2, stabilization: 2 });
        assert_eq!(*clock.sleeps.borrow(), vec![Duration::from_secs(60); 2]);

        assert_eq!(report.transfers.len(), 1);
        let local = dir.path().join("20240101120000.tar");
        assert_eq!(report.transfers[0].local_path, local);
        assert_eq!(report.transfers[0].bytes, 1000);
        assert_eq!(std::fs::read(&local).unwrap(), payload());
        assert_eq!(progress, vec![0, 1000]);

        assert!(report.status_reported);
        let updates = api.updates.borrow();
        assert_eq!(updates[0].entity_id, STATUS_ENTITY);
        assert_eq!(updates[0].state, "2024-01-01 13-00-00");
    }

    #[test]
    fn test_missing_marker_aborts_before_any_mutation() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let mut remote = scripted_remote().with_listings(CONFIG_DIR, &[&["backups"]]);
        let api = FakeApi::default();
        let clock = ManualClock::default();

        let (err, phase) = {
            let mut session = BackupSession::new(&config, &mut remote, &api, &clock);
            let err = session.run().unwrap_err();
            (err, session.phase())
        };

        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert_eq!(phase, Phase::Failed);
        assert!(remote.executed.is_empty());
        assert!(api.actions.borrow().is_empty());
    }

    #[test]
    fn test_api_not_live_is_connectivity_failure() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let mut remote = scripted_remote();
        let api = FakeApi {
            live: false,
            ..FakeApi::default()
        };
        let clock = ManualClock::default();

        let err = BackupSession::new(&config, &mut remote, &api, &clock)
            .run()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
        assert!(remote.deleted().is_empty());
    }

    #[test]
    fn test_missing_destination_is_precondition_failure() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir.path().join("nope"));
        let mut remote = scripted_remote();
        let api = FakeApi::default();
        let clock = ManualClock::default();

        let err = BackupSession::new(&config, &mut remote, &api, &clock)
            .run()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(remote.executed.is_empty());
    }

    #[test]
    fn test_creation_timeout() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let mut remote = FakeRemote::default()
            .with_listings(CONFIG_DIR, &[&["configuration.yaml"]])
            .with_listings(BACKUPS, &[&["note.txt"]]);
        let api = FakeApi::default();
        let clock = ManualClock::default();

        let (err, phase) = {
            let mut session = BackupSession::new(&config, &mut remote, &api, &clock);
            let err = session.run().unwrap_err();
            (err, session.phase())
        };

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(phase, Phase::Failed);
        assert_eq!(clock.sleep_count(), 4);
    }

    #[test]
    fn test_checksum_mismatch_leaves_no_local_file() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let mut remote =
            scripted_remote().with_checksum(NEW_BACKUP, "ffffffffffffffffffffffffffffffff");
        let api = FakeApi::default().with_entity(STATUS_ENTITY, "old");
        let clock = ManualClock::default();

        let err = BackupSession::new(&config, &mut remote, &api, &clock)
            .run()
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(!dir.path().join("20240101120000.tar").exists());
        assert!(api.updates.borrow().is_empty());
    }

    #[test]
    fn test_missing_status_entity_still_succeeds() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let mut remote = scripted_remote();
        let api = FakeApi::default();
        let clock = ManualClock::default();

        let report = BackupSession::new(&config, &mut remote, &api, &clock)
            .run()
            .unwrap();

        assert!(!report.status_reported);
        assert_eq!(report.transfers.len(), 1);
        assert!(dir.path().join("20240101120000.tar").exists());
    }

    #[test]
    fn test_rotation_only_while_rotating() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let mut remote = scripted_remote();
        let api = FakeApi::default();
        let clock = ManualClock::default();
        let mut session = BackupSession::new(&config, &mut remote, &api, &clock);

        assert!(session.rotate(BACKUPS).is_err());

        session.enter(Phase::Rotating).unwrap();
        session.enter(Phase::Transferring).unwrap();
        assert!(session.rotate(BACKUPS).is_err());
        assert!(session.enter(Phase::Rotating).is_err());
    }

    #[test]
    fn test_finished_session_cannot_restart() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let mut remote = scripted_remote();
        let api = FakeApi::default();
        let clock = ManualClock::default();
        let mut session = BackupSession::new(&config, &mut remote, &api, &clock);

        session.run().unwrap();
        assert!(session.run().is_err());
    }
}
