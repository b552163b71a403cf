//! In-memory fakes of the remote host, management API and clock.

use chrono::{DateTime, Local, TimeZone};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Cursor, Read};
use std::time::Duration;

use crate::api::{Entity, EntityCatalog, ManagementApi};
use crate::clock::Clock;
use crate::remote::{RemoteFile, RemoteHost, RemoteStat};
use crate::transfer::checksum::{digest_hex, ChecksumAlgorithm};
use crate::utils::errors::{BackupError, Result};

pub fn local_time(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

pub fn local_timestamp(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> i64 {
    local_time(y, mo, d, h, mi, s).timestamp()
}

/// Pop the next scripted value; the last one repeats forever.
fn next_sticky<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

fn unquote(s: &str) -> String {
    s.trim().trim_matches('\'').replace("'\\''", "'")
}

#[derive(Default)]
pub struct FakeRemote {
    listings: HashMap<String, VecDeque<Vec<String>>>,
    sizes: HashMap<String, VecDeque<u64>>,
    files: HashMap<String, (Vec<u8>, i64)>,
    checksums: HashMap<String, String>,
    read_failures: HashMap<String, u64>,
    failing_commands: Vec<String>,
    failing_listings: Vec<String>,
    pub executed: Vec<String>,
}

impl FakeRemote {
    /// Successive `list_directory(path)` results.
    pub fn with_listings(mut self, path: &str, listings: &[&[&str]]) -> Self {
        let queue = listings
            .iter()
            .map(|l| l.iter().map(|s| s.to_string()).collect())
            .collect();
        self.listings.insert(path.to_string(), queue);
        self
    }

    /// Successive sizes reported by `stat()` on `path`.
    pub fn with_sizes(mut self, path: &str, sizes: &[u64]) -> Self {
        self.sizes.insert(path.to_string(), sizes.iter().copied().collect());
        self
    }

    pub fn with_file(mut self, path: &str, content: Vec<u8>, modified: i64) -> Self {
        self.files.insert(path.to_string(), (content, modified));
        self
    }

    /// Report `digest` from the remote checksum command instead of the real one.
    pub fn with_checksum(mut self, path: &str, digest: &str) -> Self {
        self.checksums.insert(path.to_string(), digest.to_string());
        self
    }

    /// Fail reads of `path` once `offset` bytes have been returned.
    pub fn with_read_failure(mut self, path: &str, offset: u64) -> Self {
        self.read_failures.insert(path.to_string(), offset);
        self
    }

    /// Commands starting with `prefix` exit non-zero.
    pub fn with_failing_command(mut self, prefix: &str) -> Self {
        self.failing_commands.push(prefix.to_string());
        self
    }

    /// `list_directory(path)` fails as if access were denied.
    pub fn with_failing_listing(mut self, path: &str) -> Self {
        self.failing_listings.push(path.to_string());
        self
    }

    /// Paths removed through `sudo rm -f`.
    pub fn deleted(&self) -> Vec<String> {
        self.executed
            .iter()
            .filter_map(|c| c.strip_prefix("sudo rm -f "))
            .map(unquote)
            .collect()
    }

    fn checksum_output(&self, algorithm: ChecksumAlgorithm, path: &str) -> Result<Vec<String>> {
        let digest = match (self.checksums.get(path), self.files.get(path)) {
            (Some(digest), _) => digest.clone(),
            (None, Some((content, _))) => digest_hex(algorithm, content),
            (None, None) => {
                return Err(BackupError::RemoteCommand {
                    command: format!("{} -b {path}", algorithm.remote_command()),
                    message: format!("{path}: No such file or directory"),
                })
            }
        };
        Ok(vec![format!("{digest} *{path}")])
    }
}

impl RemoteHost for FakeRemote {
    fn list_directory(&mut self, path: &str) -> Result<Vec<String>> {
        if self.failing_listings.iter().any(|p| p == path) {
            return Err(BackupError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{path}: permission denied"),
            )));
        }
        Ok(self
            .listings
            .get_mut(path)
            .and_then(next_sticky)
            .unwrap_or_default())
    }

    fn execute(&mut self, command: &str) -> Result<Vec<String>> {
        self.executed.push(command.to_string());

        if self.failing_commands.iter().any(|p| command.starts_with(p.as_str())) {
            return Err(BackupError::RemoteCommand {
                command: command.to_string(),
                message: "exit status 1".into(),
            });
        }
        if let Some(path) = command.strip_prefix("md5sum -b ") {
            return self.checksum_output(ChecksumAlgorithm::Md5, &unquote(path));
        }
        if let Some(path) = command.strip_prefix("sha256sum -b ") {
            return self.checksum_output(ChecksumAlgorithm::Sha256, &unquote(path));
        }
        Ok(Vec::new())
    }

    fn open_for_read(&mut self, path: &str) -> Result<Box<dyn RemoteFile>> {
        let scripted_size = self.sizes.get_mut(path).and_then(next_sticky);
        let (content, modified) = match self.files.get(path) {
            Some((content, modified)) => (content.clone(), *modified),
            None if scripted_size.is_some() => (Vec::new(), 0),
            None => {
                return Err(BackupError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{path}: no such file"),
                )))
            }
        };
        let stat = RemoteStat {
            size: scripted_size.unwrap_or(content.len() as u64),
            modified,
        };
        Ok(Box::new(FakeFile {
            cursor: Cursor::new(content),
            stat,
            fail_at: self.read_failures.get(path).copied(),
        }))
    }
}

struct FakeFile {
    cursor: Cursor<Vec<u8>>,
    stat: RemoteStat,
    fail_at: Option<u64>,
}

impl Read for FakeFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.fail_at {
            Some(offset) if self.cursor.position() >= offset => Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "channel closed",
            )),
            Some(offset) => {
                let allowed = (offset - self.cursor.position()) as usize;
                let len = buf.len().min(allowed);
                self.cursor.read(&mut buf[..len])
            }
            None => self.cursor.read(buf),
        }
    }
}

impl RemoteFile for FakeFile {
    fn stat(&mut self) -> Result<RemoteStat> {
        Ok(self.stat)
    }
}

pub struct FakeApi {
    pub live: bool,
    pub entities: Vec<Entity>,
    pub fail_listing: bool,
    pub fail_update: bool,
    pub actions: RefCell<Vec<(String, String)>>,
    pub updates: RefCell<Vec<Entity>>,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self {
            live: true,
            entities: Vec::new(),
            fail_listing: false,
            fail_update: false,
            actions: RefCell::default(),
            updates: RefCell::default(),
        }
    }
}

impl FakeApi {
    pub fn with_entity(mut self, entity_id: &str, state: &str) -> Self {
        self.entities.push(Entity {
            entity_id: entity_id.to_string(),
            state: state.to_string(),
            attributes: serde_json::Map::new(),
        });
        self
    }
}

impl ManagementApi for FakeApi {
    fn check_liveness(&self) -> Result<bool> {
        Ok(self.live)
    }

    fn invoke_action(&self, domain: &str, action: &str) -> Result<()> {
        self.actions
            .borrow_mut()
            .push((domain.to_string(), action.to_string()));
        Ok(())
    }

    fn list_entities(&self) -> Result<EntityCatalog> {
        if self.fail_listing {
            return Err(BackupError::Api("/api/states returned HTTP 500".into()));
        }
        Ok(EntityCatalog::from_entities(self.entities.clone()))
    }

    fn update_entity(&self, entity: &Entity) -> Result<()> {
        if self.fail_update {
            return Err(BackupError::Api("update rejected".into()));
        }
        self.updates.borrow_mut().push(entity.clone());
        Ok(())
    }
}

/// Clock with a fixed `now` that records sleeps instead of blocking.
pub struct ManualClock {
    pub now: DateTime<Local>,
    pub sleeps: RefCell<Vec<Duration>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Local>) -> Self {
        Self {
            now,
            sleeps: RefCell::default(),
        }
    }

    pub fn sleep_count(&self) -> usize {
        self.sleeps.borrow().len()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at(local_time(2024, 1, 1, 13, 0, 0))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        self.now
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
    }
}
