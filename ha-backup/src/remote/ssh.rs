//! SSH/SFTP implementation of [`RemoteHost`] on top of `ssh2`.

use ssh2::{CheckResult, ErrorCode, ExtendedData, KnownHostFileKind, Session, Sftp};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use tracing::{debug, info, warn};

use super::{RemoteFile, RemoteHost, RemoteStat};
use crate::config::RemoteConfig;
use crate::utils::errors::{BackupError, Result};

/// libssh2 `LIBSSH2_FX_NO_SUCH_FILE`
const SFTP_NO_SUCH_FILE: i32 = 2;

/// An authenticated SSH session with an open SFTP subsystem.
///
/// The session is disconnected when dropped, so every exit path releases it.
pub struct SshRemote {
    session: Session,
    sftp: Option<Sftp>,
    host: String,
    password: Option<String>,
}

impl SshRemote {
    pub fn connect(config: &RemoteConfig) -> Result<Self> {
        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| connectivity(config, e))?
            .next()
            .ok_or_else(|| {
                BackupError::Connectivity(format!("{} did not resolve to an address", config.host))
            })?;

        let tcp = TcpStream::connect_timeout(&addr, config.connect_timeout())
            .map_err(|e| connectivity(config, e))?;

        let mut session = Session::new().map_err(|e| connectivity(config, e))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout_ms(config));
        session.handshake().map_err(|e| connectivity(config, e))?;

        if let Some(known_hosts) = &config.known_hosts {
            verify_host_key(&session, config, known_hosts)?;
        }

        authenticate(&session, config)?;
        // Remote commands such as checksumming a large archive may run long.
        session.set_timeout(0);

        let sftp = session.sftp().map_err(|e| connectivity(config, e))?;
        info!(host = %config.host, port = config.port, "Connected to SSH");

        Ok(Self {
            session,
            sftp: Some(sftp),
            host: config.host.clone(),
            password: config.password.clone(),
        })
    }

    /// Disconnect explicitly. Dropping the value does the same.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.sftp.take().is_some() {
            if let Err(e) = self.session.disconnect(None, "session closed", None) {
                warn!(host = %self.host, "SSH disconnect failed: {}", e);
            } else {
                debug!(host = %self.host, "SSH session closed");
            }
        }
    }

    fn sftp(&self) -> Result<&Sftp> {
        self.sftp
            .as_ref()
            .ok_or_else(|| BackupError::Connectivity(format!("SSH session to {} is closed", self.host)))
    }

    /// Rewrite a `sudo` command so it never prompts on a TTY: the password is
    /// piped on stdin when configured, otherwise sudo must not ask for one.
    fn privileged(&self, command: &str) -> (String, Option<&str>) {
        match command.strip_prefix("sudo ") {
            Some(rest) => match self.password.as_deref() {
                Some(password) => (format!("sudo -S -p '' {rest}"), Some(password)),
                None => (format!("sudo -n {rest}"), None),
            },
            None => (command.to_string(), None),
        }
    }
}

impl Drop for SshRemote {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl RemoteHost for SshRemote {
    fn list_directory(&mut self, path: &str) -> Result<Vec<String>> {
        match self.sftp()?.readdir(Path::new(path)) {
            Ok(entries) => {
                let mut names: Vec<String> = entries
                    .into_iter()
                    .filter_map(|(p, _)| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                    .collect();
                names.sort();
                Ok(names)
            }
            Err(e) if matches!(e.code(), ErrorCode::SFTP(SFTP_NO_SUCH_FILE)) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn execute(&mut self, command: &str) -> Result<Vec<String>> {
        let (command_line, stdin) = self.privileged(command);
        debug!(command = %command_line, "Executing remote command");

        let mut channel = self.session.channel_session()?;
        // stderr shares the channel window; merging it keeps a chatty
        // command from stalling while stdout is drained.
        channel.handle_extended_data(ExtendedData::Merge)?;
        channel.exec(&command_line)?;
        if let Some(password) = stdin {
            channel.write_all(format!("{}\n", password).as_bytes())?;
        }
        channel.send_eof()?;

        let mut output = String::new();
        channel.read_to_string(&mut output)?;
        channel.wait_close()?;

        command_result(command, channel.exit_status()?, &output)
    }

    fn open_for_read(&mut self, path: &str) -> Result<Box<dyn RemoteFile>> {
        let file = self.sftp()?.open(Path::new(path))?;
        Ok(Box::new(SftpFile(file)))
    }
}

struct SftpFile(ssh2::File);

impl Read for SftpFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl RemoteFile for SftpFile {
    fn stat(&mut self) -> Result<RemoteStat> {
        let stat = self.0.stat()?;
        Ok(RemoteStat {
            size: stat.size.unwrap_or(0),
            modified: stat.mtime.map(|m| m as i64).unwrap_or(0),
        })
    }
}

fn authenticate(session: &Session, config: &RemoteConfig) -> Result<()> {
    let mut failures: Vec<String> = Vec::new();

    if let Some(key) = &config.private_key {
        if let Err(e) = session.userauth_pubkey_file(&config.username, None, key, None) {
            failures.push(format!("key {}: {}", key.display(), e));
        }
    }
    if !session.authenticated() {
        if let Some(password) = &config.password {
            if let Err(e) = session.userauth_password(&config.username, password) {
                failures.push(format!("password: {}", e));
            }
        }
    }
    if !session.authenticated() {
        if let Err(e) = session.userauth_agent(&config.username) {
            failures.push(format!("agent: {}", e));
        }
    }

    if session.authenticated() {
        Ok(())
    } else {
        Err(BackupError::Connectivity(format!(
            "SSH authentication as {}@{} failed ({})",
            config.username,
            config.host,
            failures.join("; ")
        )))
    }
}

fn verify_host_key(session: &Session, config: &RemoteConfig, known_hosts: &Path) -> Result<()> {
    let mut hosts = session.known_hosts().map_err(|e| connectivity(config, e))?;
    hosts
        .read_file(known_hosts, KnownHostFileKind::OpenSSH)
        .map_err(|e| {
            BackupError::Connectivity(format!("cannot read {}: {}", known_hosts.display(), e))
        })?;

    let (key, _) = session
        .host_key()
        .ok_or_else(|| BackupError::Connectivity(format!("{} sent no host key", config.host)))?;

    match hosts.check_port(&config.host, config.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::NotFound => Err(BackupError::Connectivity(format!(
            "host key for {} not found in {}",
            config.host,
            known_hosts.display()
        ))),
        CheckResult::Mismatch => Err(BackupError::Connectivity(format!(
            "host key for {} does not match {}",
            config.host,
            known_hosts.display()
        ))),
        CheckResult::Failure => Err(BackupError::Connectivity(format!(
            "host key check for {} failed",
            config.host
        ))),
    }
}

fn timeout_ms(config: &RemoteConfig) -> u32 {
    u32::try_from(config.connect_timeout().as_millis()).unwrap_or(u32::MAX)
}

fn connectivity(config: &RemoteConfig, err: impl std::fmt::Display) -> BackupError {
    BackupError::Connectivity(format!("{}:{}: {}", config.host, config.port, err))
}

/// Turn a finished command's exit status and merged output into its
/// non-empty output lines.
fn command_result(command: &str, status: i32, output: &str) -> Result<Vec<String>> {
    if status != 0 {
        return Err(BackupError::RemoteCommand {
            command: command.to_string(),
            message: format!("exit status {}: {}", status, output.trim()),
        });
    }

    Ok(output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}
