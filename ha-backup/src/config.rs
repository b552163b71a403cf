//! Configuration management for ha-backup.
//!
//! Built-in defaults are layered under an optional TOML file and
//! `HA_BACKUP__<SECTION>__<KEY>` environment variables. The binary applies
//! command line arguments on top and then calls [`Config::finalize`].

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transfer::checksum::ChecksumAlgorithm;
use crate::utils::errors::{BackupError, Result};

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "HA_BACKUP";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub api: ApiConfig,
    pub paths: PathsConfig,
    pub polling: PollingConfig,
    pub transfer: TransferConfig,
    pub status: StatusConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// SSH host; defaults to the host part of the API URL
    pub host: String,

    pub port: u16,

    pub username: String,

    /// Also piped to `sudo -S` for privileged commands
    #[serde(skip_serializing)]
    pub password: Option<String>,

    pub private_key: Option<PathBuf>,

    /// OpenSSH known_hosts file; when set the host key must match an entry
    pub known_hosts: Option<PathBuf>,

    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the Home Assistant instance, e.g. `http://192.168.0.4:8123/`
    pub url: String,

    /// Long-lived access token
    #[serde(skip_serializing)]
    pub token: String,

    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Remote Home Assistant config directory
    pub config_dir: String,

    /// Backup directory name inside `config_dir`
    pub backups_dir: String,

    /// File whose presence marks `config_dir` as a real config directory
    pub marker_file: String,

    /// Local directory receiving verified backups
    pub destination: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_secs: u64,
    pub creation_attempts: u32,
    pub stabilization_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Read/write chunk size in bytes
    pub chunk_size: usize,

    pub checksum: ChecksumAlgorithm,

    /// Extension (without dot) identifying backup archives
    pub archive_extension: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Entity receiving the completion timestamp, `<domain>.<object_id>`
    pub entity_id: String,

    /// chrono format string for the timestamp
    pub timestamp_format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    pub output: LogOutput,

    /// Directory for rolling log files when `output = "file"`
    pub directory: PathBuf,
}

// Default values
fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_api_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_creation_attempts() -> u32 {
    5
}

fn default_stabilization_attempts() -> u32 {
    120 // ~2 hours at the default interval
}

fn default_chunk_size() -> usize {
    2048
}

fn default_archive_extension() -> String {
    "tar".to_string()
}

fn default_status_entity() -> String {
    "input_datetime.backup_last".to_string()
}

fn default_timestamp_format() -> String {
    "%Y-%m-%d %H-%M-%S".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_ssh_port(),
            username: String::new(),
            password: None,
            private_key: None,
            known_hosts: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            timeout_secs: default_api_timeout_secs(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_dir: String::new(),
            backups_dir: "backups".to_string(),
            marker_file: "configuration.yaml".to_string(),
            destination: PathBuf::new(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
            creation_attempts: default_creation_attempts(),
            stabilization_attempts: default_stabilization_attempts(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            checksum: ChecksumAlgorithm::Md5,
            archive_extension: default_archive_extension(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            entity_id: default_status_entity(),
            timestamp_format: default_timestamp_format(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Stdout,
            directory: PathBuf::from("logs"),
        }
    }
}

impl Config {
    /// Load defaults, then the optional TOML file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(BackupError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            builder = builder
                .add_source(::config::File::from(path).format(::config::FileFormat::Toml));
        }

        builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<Config>())
            .map_err(|e| BackupError::Config(e.to_string()))
    }

    /// Parse a TOML document on top of the defaults, without environment
    /// overrides.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| BackupError::Config(e.to_string()))
    }

    /// Render the effective configuration; secrets are never serialized.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| BackupError::Config(e.to_string()))
    }

    /// Fill derived values and validate the merged configuration.
    pub fn finalize(mut self) -> Result<Self> {
        if self.remote.host.is_empty() {
            if let Some(host) = host_from_url(&self.api.url) {
                self.remote.host = host;
            }
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("api.url", self.api.url.as_str()),
            ("api.token", self.api.token.as_str()),
            ("remote.host", self.remote.host.as_str()),
            ("remote.username", self.remote.username.as_str()),
            ("paths.config_dir", self.paths.config_dir.as_str()),
            ("paths.backups_dir", self.paths.backups_dir.as_str()),
            ("transfer.archive_extension", self.transfer.archive_extension.as_str()),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(BackupError::Config(format!("{name} must be set")));
        }
        if self.paths.destination.as_os_str().is_empty() {
            return Err(BackupError::Config("paths.destination must be set".into()));
        }
        if self.remote.password.is_none() && self.remote.private_key.is_none() {
            // Agent auth is still attempted, but sudo needs a password or NOPASSWD.
            tracing::debug!("No SSH password or key configured, relying on ssh-agent");
        }
        if self.transfer.chunk_size == 0 {
            return Err(BackupError::Config("transfer.chunk_size must be positive".into()));
        }
        if self.polling.creation_attempts == 0 || self.polling.stabilization_attempts == 0 {
            return Err(BackupError::Config("polling attempt counts must be positive".into()));
        }
        if self.status.entity_id.split_once('.').map_or(true, |(d, o)| d.is_empty() || o.is_empty()) {
            return Err(BackupError::Config(format!(
                "status.entity_id '{}' is not of the form <domain>.<object_id>",
                self.status.entity_id
            )));
        }
        if StrftimeItems::new(&self.status.timestamp_format).any(|item| matches!(item, Item::Error)) {
            return Err(BackupError::Config(format!(
                "status.timestamp_format '{}' is not a valid strftime format",
                self.status.timestamp_format
            )));
        }
        Ok(())
    }
}

impl RemoteConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl ApiConfig {
    /// REST root, `<url>/api`.
    pub fn base_url(&self) -> String {
        if self.url.ends_with('/') {
            format!("{}api", self.url)
        } else {
            format!("{}/api", self.url)
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PathsConfig {
    /// Remote backup directory, `<config_dir>/<backups_dir>`.
    pub fn remote_backups_dir(&self) -> String {
        crate::remote::join(&self.config_dir, &self.backups_dir)
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn host_from_url(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}
