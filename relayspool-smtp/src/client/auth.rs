//! SASL mechanisms for AUTH.

use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};

use super::error::{ClientError, Result};

type HmacMd5 = Hmac<md5::Md5>;

/// Credentials presented to the relay after EHLO.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// AUTH PLAIN
    Plain { username: String, password: String },
    /// AUTH CRAM-MD5
    CramMd5 { username: String, password: String },
}

impl Credentials {
    /// Mechanism name as it appears in the EHLO `AUTH` line
    #[must_use]
    pub const fn mechanism(&self) -> &'static str {
        match self {
            Self::Plain { .. } => "PLAIN",
            Self::CramMd5 { .. } => "CRAM-MD5",
        }
    }

    #[must_use]
    pub fn username(&self) -> &str {
        match self {
            Self::Plain { username, .. } | Self::CramMd5 { username, .. } => username,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("mechanism", &self.mechanism())
            .field("username", &self.username())
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Initial response for AUTH PLAIN: `base64("\0user\0password")`
pub(super) fn plain_response(username: &str, password: &str) -> String {
    STANDARD.encode(format!("\0{username}\0{password}"))
}

/// Answer a CRAM-MD5 challenge: `base64("user " + hex(hmac_md5(password, challenge)))`
///
/// # Errors
///
/// Returns [`ClientError::Auth`] if the challenge is not valid base64.
pub(super) fn cram_md5_response(username: &str, password: &str, challenge: &str) -> Result<String> {
    let challenge = STANDARD
        .decode(challenge.trim())
        .map_err(|e| ClientError::Auth(format!("Invalid CRAM-MD5 challenge: {e}")))?;

    let mut mac = HmacMd5::new_from_slice(password.as_bytes())
        .map_err(|e| ClientError::Auth(format!("Unable to key CRAM-MD5 digest: {e}")))?;
    mac.update(&challenge);
    let digest = hex::encode(mac.finalize().into_bytes());

    Ok(STANDARD.encode(format!("{username} {digest}")))
}
