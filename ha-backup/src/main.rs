//! ha-backup - Main entry point
//!
//! Creates a Home Assistant backup and copies it to a local directory.

use anyhow::Result;
use clap::Parser;
use ha_backup::{
    api::HomeAssistantClient,
    clock::SystemClock,
    config::Config,
    remote::SshRemote,
    transfer::progress::{format_bytes, TransferProgress},
    utils, BackupError, BackupSession,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Home Assistant URL, e.g. http://192.168.0.4:8123/
    url: Option<String>,

    /// Home Assistant config directory on the remote host
    source_path: Option<String>,

    /// Local directory receiving the backup
    destination: Option<PathBuf>,

    /// Long-lived access token
    #[arg(env = "HA_BACKUP_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SSH host (defaults to the host of the URL)
    #[arg(long)]
    ssh_host: Option<String>,

    #[arg(long)]
    ssh_port: Option<u16>,

    #[arg(long)]
    ssh_user: Option<String>,

    /// SSH password, also used for sudo
    #[arg(long, env = "HA_BACKUP_SSH_PASSWORD", hide_env_values = true)]
    ssh_password: Option<String>,

    /// Private key file for SSH authentication
    #[arg(long, value_name = "FILE")]
    ssh_key: Option<PathBuf>,

    /// known_hosts file to verify the host key against
    #[arg(long, value_name = "FILE")]
    known_hosts: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Print the effective configuration (without secrets) and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    /// Command line values override every other configuration layer.
    fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.url {
            config.api.url = url.clone();
        }
        if let Some(path) = &self.source_path {
            config.paths.config_dir = path.clone();
        }
        if let Some(destination) = &self.destination {
            config.paths.destination = destination.clone();
        }
        if let Some(token) = &self.token {
            config.api.token = token.clone();
        }
        if let Some(host) = &self.ssh_host {
            config.remote.host = host.clone();
        }
        if let Some(port) = self.ssh_port {
            config.remote.port = port;
        }
        if let Some(user) = &self.ssh_user {
            config.remote.username = user.clone();
        }
        if let Some(password) = &self.ssh_password {
            config.remote.password = Some(password.clone());
        }
        if let Some(key) = &self.ssh_key {
            config.remote.private_key = Some(key.clone());
        }
        if let Some(known_hosts) = &self.known_hosts {
            config.remote.known_hosts = Some(known_hosts.clone());
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
    }
}

fn main() -> ExitCode {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let code = e
                .downcast_ref::<BackupError>()
                .map_or(1, |e| e.kind().exit_code());
            ExitCode::from(code)
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }
    let config = config.finalize()?;

    // Held until exit so buffered file logs are flushed
    let _log_guard = utils::logger::init(&config.log.level, &config.log)?;

    tracing::info!("Starting ha-backup v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        host = %config.remote.host,
        source = %config.paths.remote_backups_dir(),
        destination = %config.paths.destination.display(),
        "Backup target"
    );

    let api = HomeAssistantClient::new(&config.api)?;
    let mut remote = SshRemote::connect(&config.remote)?;
    let clock = SystemClock;

    let result = BackupSession::new(&config, &mut remote, &api, &clock)
        .with_progress(progress_bar())
        .run();
    remote.close();
    let report = result?;

    for transfer in &report.transfers {
        tracing::info!(
            "Saved {} ({}, {})",
            transfer.local_path.display(),
            format_bytes(transfer.bytes),
            transfer.checksum
        );
    }
    if !report.status_reported {
        tracing::warn!("Backup completed but its status was not recorded");
    }

    Ok(())
}

/// Observer drawing one progress bar per transferred file.
fn progress_bar() -> impl FnMut(&TransferProgress) {
    let mut bar: Option<ProgressBar> = None;
    move |progress: &TransferProgress| {
        // Every transfer starts with a zero-byte snapshot
        if progress.transferred_bytes == 0 || bar.is_none() {
            let style = ProgressStyle::with_template(
                "{msg} [{bar:40}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
            )
            .map(|s| s.progress_chars("=> "))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
            let new_bar = ProgressBar::new(progress.total_bytes)
                .with_style(style)
                .with_message(progress.file_name.clone());
            bar = Some(new_bar);
        }
        if let Some(bar) = &bar {
            bar.set_position(progress.transferred_bytes);
            if progress.is_complete() {
                bar.finish();
            }
        }
    }
}
