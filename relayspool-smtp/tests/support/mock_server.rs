//! Scriptable SMTP relay for transaction tests
#![allow(dead_code)]

use std::{fmt::Write, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::Mutex,
};

/// Base64 of the RFC 2195 example challenge
pub const CRAM_CHALLENGE: &str = "PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    StartTls,
    Auth(String),
    AuthResponse(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    MessageContent(Vec<u8>),
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.text).into_bytes()
    }
}

#[derive(Debug, Clone)]
struct Script {
    greeting: Reply,
    /// `None` makes EHLO fail so the client has to fall back to HELO
    capabilities: Option<Vec<String>>,
    starttls: Reply,
    auth: Reply,
    mail_from: Reply,
    rcpt_to: Reply,
    data_end: Reply,
    stall_on_rcpt: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "mock relay ready"),
            capabilities: Some(vec!["SIZE 10000000".to_string()]),
            starttls: Reply::new(454, "TLS not available"),
            auth: Reply::new(235, "Authentication successful"),
            mail_from: Reply::new(250, "OK"),
            rcpt_to: Reply::new(250, "OK"),
            data_end: Reply::new(250, "OK: queued"),
            stall_on_rcpt: false,
        }
    }
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<Mutex<Vec<SmtpCommand>>>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            script: Script::default(),
        }
    }

    #[must_use]
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.lock().await.clone()
    }

    async fn handle(
        mut stream: TcpStream,
        script: Arc<Script>,
        commands: Arc<Mutex<Vec<SmtpCommand>>>,
    ) -> std::io::Result<()> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        writer.write_all(&script.greeting.to_bytes()).await?;

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }

            let trimmed = line.trim_end().to_string();
            let (verb, rest) = trimmed
                .split_once(' ')
                .map_or((trimmed.as_str(), ""), |(verb, rest)| (verb, rest));

            let (command, reply) = match verb.to_ascii_uppercase().as_str() {
                "EHLO" => {
                    let command = SmtpCommand::Ehlo(rest.to_string());
                    let reply = script.capabilities.as_ref().map_or_else(
                        || b"502 EHLO not supported\r\n".to_vec(),
                        |capabilities| {
                            let mut text = String::from("250-mock.example.com\r\n");
                            for (i, capability) in capabilities.iter().enumerate() {
                                let sep = if i + 1 == capabilities.len() { ' ' } else { '-' };
                                let _ = write!(text, "250{sep}{capability}\r\n");
                            }
                            if capabilities.is_empty() {
                                text = "250 mock.example.com\r\n".to_string();
                            }
                            text.into_bytes()
                        },
                    );
                    (command, reply)
                }
                "HELO" => (
                    SmtpCommand::Helo(rest.to_string()),
                    b"250 mock.example.com\r\n".to_vec(),
                ),
                "STARTTLS" => (SmtpCommand::StartTls, script.starttls.to_bytes()),
                "AUTH" if rest.eq_ignore_ascii_case("CRAM-MD5") => {
                    commands.lock().await.push(SmtpCommand::Auth(rest.to_string()));
                    writer
                        .write_all(format!("334 {CRAM_CHALLENGE}\r\n").as_bytes())
                        .await?;

                    line.clear();
                    reader.read_line(&mut line).await?;
                    (
                        SmtpCommand::AuthResponse(line.trim_end().to_string()),
                        script.auth.to_bytes(),
                    )
                }
                "AUTH" => (SmtpCommand::Auth(rest.to_string()), script.auth.to_bytes()),
                "MAIL" => (
                    SmtpCommand::MailFrom(rest.to_string()),
                    script.mail_from.to_bytes(),
                ),
                "RCPT" => {
                    if script.stall_on_rcpt {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                    }
                    (SmtpCommand::RcptTo(rest.to_string()), script.rcpt_to.to_bytes())
                }
                "DATA" => {
                    commands.lock().await.push(SmtpCommand::Data);
                    writer.write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n").await?;

                    let mut content = Vec::new();
                    loop {
                        line.clear();
                        if reader.read_line(&mut line).await? == 0 {
                            return Ok(());
                        }
                        if line == ".\r\n" {
                            break;
                        }
                        content.extend_from_slice(line.as_bytes());
                    }
                    (SmtpCommand::MessageContent(content), script.data_end.to_bytes())
                }
                "QUIT" => {
                    commands.lock().await.push(SmtpCommand::Quit);
                    writer.write_all(b"221 Bye\r\n").await?;
                    return Ok(());
                }
                _ => (
                    SmtpCommand::Other(trimmed.clone()),
                    b"500 Unknown command\r\n".to_vec(),
                ),
            };

            commands.lock().await.push(command);
            writer.write_all(&reply).await?;
        }
    }
}

pub struct MockSmtpServerBuilder {
    script: Script,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, text: &str) -> Self {
        self.script.greeting = Reply::new(code, text);
        self
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.script.capabilities = Some(capabilities.iter().map(ToString::to_string).collect());
        self
    }

    #[must_use]
    pub fn without_ehlo(mut self) -> Self {
        self.script.capabilities = None;
        self
    }

    #[must_use]
    pub fn with_starttls_response(mut self, code: u16, text: &str) -> Self {
        self.script.starttls = Reply::new(code, text);
        self
    }

    #[must_use]
    pub fn with_auth_response(mut self, code: u16, text: &str) -> Self {
        self.script.auth = Reply::new(code, text);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, text: &str) -> Self {
        self.script.rcpt_to = Reply::new(code, text);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, text: &str) -> Self {
        self.script.data_end = Reply::new(code, text);
        self
    }

    #[must_use]
    pub const fn stalling_on_rcpt(mut self) -> Self {
        self.script.stall_on_rcpt = true;
        self
    }

    /// Bind to an ephemeral port and start accepting connections
    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let script = Arc::new(self.script);
        let commands = Arc::new(Mutex::new(Vec::new()));

        let accept_commands = Arc::clone(&commands);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let script = Arc::clone(&script);
                let commands = Arc::clone(&accept_commands);
                tokio::spawn(async move {
                    if let Err(e) = MockSmtpServer::handle(stream, script, commands).await {
                        eprintln!("mock server connection error: {e}");
                    }
                });
            }
        });

        Ok(MockSmtpServer { addr, commands })
    }
}
