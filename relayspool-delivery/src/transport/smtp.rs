use std::time::Duration;

use async_trait::async_trait;
use relayspool_smtp::{ClientError, Credentials, SmtpTransaction, TransactionConfig};
use serde::Deserialize;

use super::Transport;
use crate::error::TransportError;

fn default_addr() -> String {
    "127.0.0.1:25".to_string()
}

fn default_helo_name() -> String {
    "localhost".to_string()
}

const fn default_connect_timeout() -> u64 {
    30
}

const fn default_command_timeout() -> u64 {
    60
}

/// Relay connection settings.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct SmtpSettings {
    /// `host:port` of the relay
    #[serde(default = "default_addr")]
    pub addr: String,

    /// AUTH PLAIN user name; empty disables PLAIN
    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// AUTH CRAM-MD5 user name, only used when `user` is empty
    #[serde(default)]
    pub md5_user: String,

    #[serde(default)]
    pub md5_password: String,

    /// Name announced in EHLO/HELO
    #[serde(default = "default_helo_name")]
    pub helo_name: String,

    /// Default: 30 seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Applied to each command exchange. Default: 60 seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            user: String::new(),
            password: String::new(),
            md5_user: String::new(),
            md5_password: String::new(),
            helo_name: default_helo_name(),
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("addr", &self.addr)
            .field("user", &self.user)
            .field("md5_user", &self.md5_user)
            .field("helo_name", &self.helo_name)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("command_timeout_secs", &self.command_timeout_secs)
            .finish_non_exhaustive()
    }
}

impl SmtpSettings {
    /// PLAIN when a user is set, else CRAM-MD5 when an MD5 user is set
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        if !self.user.is_empty() {
            Some(Credentials::Plain {
                username: self.user.clone(),
                password: self.password.clone(),
            })
        } else if !self.md5_user.is_empty() {
            Some(Credentials::CramMd5 {
                username: self.md5_user.clone(),
                password: self.md5_password.clone(),
            })
        } else {
            None
        }
    }

    /// PLAIN credentials only travel unencrypted to a loopback relay
    #[must_use]
    pub fn transaction_config(&self) -> TransactionConfig {
        let mut config = TransactionConfig {
            server: self.addr.clone(),
            helo_name: self.helo_name.clone(),
            credentials: self.credentials(),
            plaintext_auth: false,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
        };
        config.plaintext_auth = config.is_loopback();
        config
    }
}

/// [`Transport`] over SMTP to a single fixed relay.
///
/// Every send is its own connection.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    config: TransactionConfig,
}

impl SmtpTransport {
    #[must_use]
    pub fn new(settings: &SmtpSettings) -> Self {
        Self {
            config: settings.transaction_config(),
        }
    }
}

impl From<ClientError> for TransportError {
    fn from(error: ClientError) -> Self {
        if error.is_permanent() {
            Self::Permanent(error.to_string())
        } else {
            Self::Temporary(error.to_string())
        }
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(
        &self,
        sender: &str,
        recipient: &str,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        SmtpTransaction::new(&self.config, sender, recipient, payload)
            .execute()
            .await
            .map_err(TransportError::from)
    }
}
