//! Single-recipient delivery against the configured relay.

use std::{future::Future, net::IpAddr, time::Duration};

use crate::client::{ClientError, Credentials, Response, Result, SmtpClient};

/// How to reach and talk to the relay.
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// `host:port` of the relay
    pub server: String,
    /// Name announced in EHLO/HELO
    pub helo_name: String,
    pub credentials: Option<Credentials>,
    /// Send AUTH PLAIN over a session that never negotiated TLS
    pub plaintext_auth: bool,
    pub connect_timeout: Duration,
    /// Applied to every command exchange, including the DATA payload
    pub command_timeout: Duration,
}

impl TransactionConfig {
    /// Host part of [`Self::server`], used for certificate verification
    #[must_use]
    pub fn server_domain(&self) -> &str {
        let host = self
            .server
            .rsplit_once(':')
            .map_or(self.server.as_str(), |(host, _)| host);
        host.trim_start_matches('[').trim_end_matches(']')
    }

    /// Whether the relay lives on this machine
    #[must_use]
    pub fn is_loopback(&self) -> bool {
        let host = self.server_domain();
        host.eq_ignore_ascii_case("localhost")
            || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Greeting {
    Extended,
    Basic,
}

/// One message to one recipient.
pub struct SmtpTransaction<'a> {
    config: &'a TransactionConfig,
    sender: &'a str,
    recipient: &'a str,
    payload: &'a [u8],
}

impl<'a> SmtpTransaction<'a> {
    #[must_use]
    pub const fn new(
        config: &'a TransactionConfig,
        sender: &'a str,
        recipient: &'a str,
        payload: &'a [u8],
    ) -> Self {
        Self {
            config,
            sender,
            recipient,
            payload,
        }
    }

    /// Run the whole conversation: greeting, EHLO (falling back to HELO),
    /// opportunistic STARTTLS, optional AUTH, MAIL FROM, RCPT TO, DATA and
    /// QUIT.
    ///
    /// PLAIN credentials are only sent over TLS unless
    /// [`TransactionConfig::plaintext_auth`] is set.
    ///
    /// # Errors
    ///
    /// Returns the first failure. [`ClientError::is_permanent`] tells a
    /// refusal apart from a failure worth retrying.
    #[tracing::instrument(level = "debug", skip_all, fields(server = %self.config.server, recipient = %self.recipient))]
    pub async fn execute(self) -> Result<()> {
        let mut client = self.connect_and_greet().await?;
        let mut greeting = self.hello(&mut client).await?;

        if greeting.0 == Greeting::Extended && greeting.1.advertises("STARTTLS") {
            match self.timed("STARTTLS", client.starttls()).await {
                Ok(response) if response.is_success() => {
                    greeting = self.hello(&mut client).await?;
                }
                Ok(response) => {
                    tracing::info!(
                        code = response.code,
                        "Relay refused STARTTLS, continuing in plaintext"
                    );
                }
                Err(e) if self.config.credentials.is_some() => {
                    tracing::warn!(error = %e, "STARTTLS failed, not retrying without TLS");
                    return Err(e);
                }
                Err(e) => {
                    tracing::info!(error = %e, "STARTTLS failed, reconnecting without TLS");
                    drop(client);
                    client = self.connect_and_greet().await?;
                    greeting = self.hello(&mut client).await?;
                }
            }
        }

        if let Some(credentials) = &self.config.credentials {
            if matches!(credentials, Credentials::Plain { .. })
                && !client.is_tls()
                && !self.config.plaintext_auth
            {
                return Err(ClientError::Auth(
                    "Relay did not negotiate TLS, refusing to send PLAIN credentials".to_string(),
                ));
            }
            if greeting.0 == Greeting::Extended
                && !greeting.1.supports_auth(credentials.mechanism())
            {
                tracing::warn!(
                    mechanism = credentials.mechanism(),
                    "Relay does not advertise the configured AUTH mechanism, trying anyway"
                );
            }
            self.timed("AUTH", client.authenticate(credentials)).await?;
        }

        let response = self.timed("MAIL FROM", client.mail_from(self.sender)).await?;
        expect_success("MAIL FROM", response)?;

        let response = self.timed("RCPT TO", client.rcpt_to(self.recipient)).await?;
        expect_success("RCPT TO", response)?;

        let response = self.timed("DATA", client.data()).await?;
        if !response.is_intermediate() {
            return Err(rejected("DATA", &response));
        }

        let response = self
            .timed("message data", client.send_data(self.payload))
            .await?;
        expect_success("message data", response)?;

        if let Err(e) = self.timed("QUIT", client.quit()).await {
            tracing::debug!(error = %e, "QUIT failed after successful delivery");
        }

        Ok(())
    }

    async fn connect_and_greet(&self) -> Result<SmtpClient> {
        let mut client = tokio::time::timeout(
            self.config.connect_timeout,
            SmtpClient::connect(&self.config.server, self.config.server_domain()),
        )
        .await
        .map_err(|_| ClientError::Timeout {
            stage: "connect",
            after: self.config.connect_timeout,
        })??;

        let greeting = self.timed("greeting", client.read_greeting()).await?;
        expect_success("greeting", greeting)?;

        Ok(client)
    }

    async fn hello(&self, client: &mut SmtpClient) -> Result<(Greeting, Response)> {
        let response = self
            .timed("EHLO", client.ehlo(&self.config.helo_name))
            .await?;
        if response.is_success() {
            return Ok((Greeting::Extended, response));
        }

        let response = self
            .timed("HELO", client.helo(&self.config.helo_name))
            .await?;
        Ok((Greeting::Basic, expect_success("HELO", response)?))
    }

    async fn timed<T>(
        &self,
        stage: &'static str,
        future: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.config.command_timeout, future)
            .await
            .map_err(|_| ClientError::Timeout {
                stage,
                after: self.config.command_timeout,
            })?
    }
}

fn rejected(stage: &'static str, response: &Response) -> ClientError {
    ClientError::Rejected {
        stage,
        code: response.code,
        message: response.message(),
    }
}

fn expect_success(stage: &'static str, response: Response) -> Result<Response> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(rejected(stage, &response))
    }
}
