//! SMTP client connection with in-place STARTTLS upgrade.

use std::sync::Arc;

use relayspool_common::outgoing;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, RootCertStore, pki_types::ServerName},
};

use super::{
    auth::{self, Credentials},
    error::{ClientError, Result},
    response::Response,
};

/// Initial size of the read buffer for SMTP replies.
const BUFFER_SIZE: usize = 4096;

/// Upper bound on a single reply, guarding against a misbehaving server.
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

enum ClientConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl ClientConnection {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await?,
            Self::Tls(stream) => stream.write_all(data).await?,
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }

    async fn upgrade_to_tls(self, domain: &str) -> Result<Self> {
        let Self::Plain(stream) = self else {
            return Err(ClientError::Tls("Connection is already TLS".to_string()));
        };

        let mut roots = RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        for cert in native.certs {
            roots
                .add(cert)
                .map_err(|e| ClientError::Tls(format!("Failed to add certificate: {e}")))?;
        }
        if !native.errors.is_empty() {
            tracing::warn!(errors = ?native.errors, "Some native certificates could not be loaded");
        }

        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let server_name = ServerName::try_from(domain.to_string())
            .map_err(|e| ClientError::Tls(format!("Invalid server name {domain}: {e}")))?;

        let stream = TlsConnector::from(Arc::new(config))
            .connect(server_name, stream)
            .await
            .map_err(|e| ClientError::Tls(e.to_string()))?;

        Ok(Self::Tls(Box::new(stream)))
    }
}

/// One SMTP conversation with the relay.
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    server_domain: String,
    tls: bool,
}

impl SmtpClient {
    /// Connect to `addr`. `server_domain` is the name the certificate is
    /// checked against if the session is later upgraded with STARTTLS.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection cannot be established.
    pub async fn connect(addr: &str, server_domain: impl Into<String>) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;

        Ok(Self {
            connection: Some(ClientConnection::Plain(stream)),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            server_domain: server_domain.into(),
            tls: false,
        })
    }

    /// Whether the session has been upgraded with STARTTLS
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.tls
    }

    /// Read the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the reply is malformed.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await
    }

    /// Send a single command line and read the reply.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        self.exchange(command, command).await
    }

    /// Like [`Self::command`], but logs `shown` in place of the line sent
    async fn exchange(&mut self, command: &str, shown: &str) -> Result<Response> {
        outgoing!("C: {shown}");
        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(format!("{command}\r\n").as_bytes())
            .await?;
        self.read_response().await
    }

    /// # Errors
    ///
    /// Returns an error if the command cannot be exchanged.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command cannot be exchanged.
    pub async fn helo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("HELO {domain}")).await
    }

    /// `MAIL FROM:<from>`, an empty `from` being the null reverse path
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be exchanged.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command cannot be exchanged.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command cannot be exchanged.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Transmit the message content after a `354` reply, terminated by
    /// `<CRLF>.<CRLF>`, and read the final reply.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn send_data(&mut self, payload: &[u8]) -> Result<Response> {
        outgoing!("C: <{} bytes of message data>", payload.len());
        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(&dot_stuff(payload))
            .await?;
        self.read_response().await
    }

    /// # Errors
    ///
    /// Returns an error if the command cannot be exchanged.
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    /// Issue STARTTLS and, if accepted, upgrade the connection in place.
    ///
    /// Any buffered plaintext is discarded once the upgrade starts.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange or the TLS handshake fails.
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self.command("STARTTLS").await?;
        if !response.is_success() {
            return Ok(response);
        }

        let connection = self
            .connection
            .take()
            .ok_or(ClientError::ConnectionClosed)?;
        self.buffer_pos = 0;
        self.connection = Some(connection.upgrade_to_tls(&self.server_domain).await?);
        self.tls = true;

        Ok(response)
    }

    /// Authenticate with the given credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Rejected`] if the server refuses the
    /// credentials, or an I/O or parse error from the exchange.
    pub async fn authenticate(&mut self, credentials: &Credentials) -> Result<()> {
        let response = match credentials {
            Credentials::Plain { username, password } => {
                let initial = auth::plain_response(username, password);
                self.exchange(&format!("AUTH PLAIN {initial}"), "AUTH PLAIN <redacted>")
                    .await?
            }
            Credentials::CramMd5 { username, password } => {
                let challenge = self.command("AUTH CRAM-MD5").await?;
                if challenge.code != 334 {
                    return Err(ClientError::Rejected {
                        stage: "AUTH",
                        code: challenge.code,
                        message: challenge.message(),
                    });
                }
                let answer = auth::cram_md5_response(
                    username,
                    password,
                    challenge.lines.first().map_or("", String::as_str),
                )?;
                self.exchange(&answer, "<redacted>").await?
            }
        };

        if response.is_success() {
            Ok(())
        } else {
            Err(ClientError::Rejected {
                stage: "AUTH",
                code: response.code,
                message: response.message(),
            })
        }
    }

    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) = Response::parse(&self.buffer[..self.buffer_pos])? {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;
                outgoing!("S: {} {}", response.code, response.message());
                return Ok(response);
            }

            if self.buffer_pos == self.buffer.len() {
                let grown = self.buffer.len() * 2;
                if grown > MAX_BUFFER_SIZE {
                    return Err(ClientError::Parse(format!(
                        "Reply too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(grown, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            self.buffer_pos += connection.read(&mut self.buffer[self.buffer_pos..]).await?;
        }
    }
}

/// Prepare a payload for DATA: bare LF becomes CRLF, lines starting with
/// `.` get an extra `.`, and the terminating `.` line is appended.
fn dot_stuff(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 16);
    let mut line_start = true;
    let mut previous = 0u8;

    for &byte in payload {
        if line_start && byte == b'.' {
            out.push(b'.');
        }
        if byte == b'\n' && previous != b'\r' {
            out.push(b'\r');
        }
        out.push(byte);
        line_start = byte == b'\n';
        previous = byte;
    }

    if !payload.is_empty() && !line_start {
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}
