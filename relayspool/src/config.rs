//! Startup configuration.
//!
//! Settings come from three layers: built-in defaults, an optional RON file
//! (`--config` or `RELAYSPOOL_CONFIG`) and the command line, each overriding
//! the one before.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use relayspool_delivery::{DeliveryProcessor, RetryPolicy, SmtpSettings};
use relayspool_spool::FileSpool;
use serde::Deserialize;

use crate::controller::Relayspool;

/// Ledger snapshot name inside the spool directory when none is configured
pub const DEFAULT_STATE_FILE: &str = ".queue-state";

/// Relay every message dropped into a spool directory to an SMTP server,
/// tracking delivery per recipient
#[derive(Parser, Debug)]
#[command(name = "relayspool")]
#[command(version, long_about = None)]
pub struct Cli {
    /// Directory to pick messages up from
    pub spool_dir: PathBuf,

    /// RON configuration file
    #[arg(long, env = "RELAYSPOOL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Relay address as host:port [default: 127.0.0.1:25]
    #[arg(long)]
    pub smtp_addr: Option<String>,

    /// User name for AUTH PLAIN
    #[arg(long)]
    pub smtp_user: Option<String>,

    #[arg(long)]
    pub smtp_password: Option<String>,

    /// User name for AUTH CRAM-MD5, used only without a PLAIN user
    #[arg(long)]
    pub smtp_md5_user: Option<String>,

    #[arg(long)]
    pub smtp_md5_password: Option<String>,

    /// Name to announce in EHLO [default: localhost]
    #[arg(long)]
    pub helo_name: Option<String>,

    /// Seconds between spool scans [default: 10]
    #[arg(long, value_name = "SECONDS")]
    pub freq: Option<u64>,

    /// Attempts per recipient before giving up [default: 100]
    #[arg(long)]
    pub attempts: Option<u32>,

    /// Ledger snapshot path [default: <SPOOL_DIR>/.queue-state]
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Seconds to wait for the relay to accept a connection [default: 30]
    #[arg(long, value_name = "SECONDS")]
    pub connect_timeout: Option<u64>,

    /// Seconds to wait for each SMTP reply [default: 60]
    #[arg(long, value_name = "SECONDS")]
    pub command_timeout: Option<u64>,
}

/// Layout of the RON configuration file
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub smtp: SmtpSettings,

    #[serde(default)]
    pub delivery: DeliveryProcessor,
}

impl FileConfig {
    /// Read and parse a configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid RON.
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        ron::from_str(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

impl Cli {
    /// Combine the command line with the config file, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be used or the spool
    /// directory does not exist.
    pub fn resolve(self) -> anyhow::Result<Relayspool> {
        let file = match &self.config {
            Some(path) => FileConfig::read(path)?,
            None => FileConfig::default(),
        };

        self.merge(file)
    }

    fn merge(self, file: FileConfig) -> anyhow::Result<Relayspool> {
        let spool = FileSpool::open(&self.spool_dir)
            .with_context(|| format!("Unusable spool directory {}", self.spool_dir.display()))?;

        let FileConfig {
            mut smtp,
            mut delivery,
        } = file;

        set(&mut smtp.addr, self.smtp_addr);
        set(&mut smtp.user, self.smtp_user);
        set(&mut smtp.password, self.smtp_password);
        set(&mut smtp.md5_user, self.smtp_md5_user);
        set(&mut smtp.md5_password, self.smtp_md5_password);
        set(&mut smtp.helo_name, self.helo_name);
        set(&mut smtp.connect_timeout_secs, self.connect_timeout);
        set(&mut smtp.command_timeout_secs, self.command_timeout);

        set(&mut delivery.scan_interval_secs, self.freq);
        set(&mut delivery.retry, self.attempts.map(RetryPolicy::new));

        delivery.state_file = Some(
            self.state_file
                .or(delivery.state_file)
                .unwrap_or_else(|| spool.path().join(DEFAULT_STATE_FILE)),
        );

        Ok(Relayspool {
            spool,
            smtp,
            delivery,
        })
    }
}
