//! Type-state SMTP client.

use super::{ServerInfo, SmtpStream, TlsOptions};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::{Address, AuthMechanism, Extension, Reply, ReplyCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::marker::PhantomData;
use tracing::debug;

/// Type-state marker for connected state.
#[derive(Debug)]
pub struct Connected;

/// Type-state marker for authenticated state.
#[derive(Debug)]
pub struct Authenticated;

/// Type-state marker for mail transaction started.
#[derive(Debug)]
pub struct MailTransaction;

/// Type-state marker for recipient added.
#[derive(Debug)]
pub struct RecipientAdded;

/// Type-state marker for data mode.
#[derive(Debug)]
pub struct Data;

/// SMTP client with type-state pattern.
///
/// Each transition consumes the client, so a failed command drops the
/// session and closes the socket.
#[derive(Debug)]
pub struct Client<State> {
    stream: SmtpStream,
    server_info: ServerInfo,
    client_name: String,
    _state: PhantomData<State>,
}

/// Connection trait for all states.
pub trait SmtpConnection {
    /// Returns the server information.
    fn server_info(&self) -> &ServerInfo;
}

impl<S> SmtpConnection for Client<S> {
    fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }
}

impl Client<Connected> {
    /// Creates a client from a stream and reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the greeting fails or if the server returns an error.
    pub async fn from_stream(mut stream: SmtpStream) -> Result<Self> {
        let greeting = read_reply(&mut stream).await?;
        if greeting.code != ReplyCode::SERVICE_READY {
            return Err(reject(&greeting));
        }

        let hostname = greeting
            .lines
            .first()
            .and_then(|msg| msg.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();
        debug!(%hostname, "Greeting received");

        Ok(Self {
            stream,
            server_info: ServerInfo {
                hostname,
                ..ServerInfo::default()
            },
            client_name: String::new(),
            _state: PhantomData,
        })
    }

    /// Introduces the client with EHLO, falling back to HELO for servers
    /// that reject EHLO.
    ///
    /// # Errors
    ///
    /// Returns an error if both greetings are refused.
    pub async fn ehlo(mut self, client_hostname: &str) -> Result<Self> {
        self.client_name = client_hostname.to_string();

        let reply = self
            .send_command(Command::Ehlo {
                hostname: client_hostname.to_string(),
            })
            .await?;
        if reply.is_success() {
            self.server_info.extensions = parse_extensions(&reply);
            return Ok(self);
        }

        debug!(code = reply.code.as_u16(), "EHLO refused, trying HELO");
        let reply = self
            .send_command(Command::Helo {
                hostname: client_hostname.to_string(),
            })
            .await?;
        if !reply.is_success() {
            return Err(reject(&reply));
        }
        self.server_info.extensions.clear();
        Ok(self)
    }

    /// Upgrades the connection to TLS using STARTTLS and greets again.
    ///
    /// # Errors
    ///
    /// Returns an error if STARTTLS is not supported or if the upgrade fails.
    pub async fn starttls(mut self, hostname: &str, tls: &TlsOptions) -> Result<Self> {
        if !self.server_info.supports_starttls() {
            return Err(Error::NotSupported("STARTTLS".into()));
        }

        let reply = self.send_command(Command::StartTls).await?;
        if reply.code != ReplyCode::SERVICE_READY {
            return Err(reject(&reply));
        }

        self.stream = self.stream.upgrade_to_tls(hostname, tls).await?;

        // Capabilities may change once the channel is encrypted.
        let client_name = std::mem::take(&mut self.client_name);
        self.ehlo(&client_name).await
    }

    /// Authenticates with PLAIN, or LOGIN when only LOGIN is advertised.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if the server refuses the credentials, or
    /// [`Error::NotSupported`] if it offers neither mechanism.
    pub async fn authenticate(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<Authenticated>> {
        let offered = self.server_info.auth_mechanisms();
        let mechanism = if !self.server_info.supports_auth()
            || offered.contains(&AuthMechanism::Plain)
        {
            AuthMechanism::Plain
        } else if offered.contains(&AuthMechanism::Login) {
            AuthMechanism::Login
        } else {
            return Err(Error::NotSupported("AUTH PLAIN or LOGIN".into()));
        };
        debug!(mechanism = mechanism.as_str(), "Authenticating");

        let reply = match mechanism {
            AuthMechanism::Login => self.auth_login(username, password).await?,
            AuthMechanism::Plain => {
                let credentials = format!("\0{username}\0{password}");
                self.send_command(Command::Auth {
                    mechanism: AuthMechanism::Plain,
                    initial_response: Some(STANDARD.encode(credentials)),
                })
                .await?
            }
        };

        if reply.code != ReplyCode::AUTH_SUCCEEDED {
            return Err(auth_failure(&reply));
        }
        Ok(self.transition())
    }

    async fn auth_login(&mut self, username: &str, password: &str) -> Result<Reply> {
        let mut reply = self
            .send_command(Command::Auth {
                mechanism: AuthMechanism::Login,
                initial_response: None,
            })
            .await?;

        for secret in [username, password] {
            if reply.code != ReplyCode::AUTH_CONTINUE {
                return Err(auth_failure(&reply));
            }
            reply = self
                .send_command(Command::AuthResponse(STANDARD.encode(secret)))
                .await?;
        }

        Ok(reply)
    }

    /// Starts a mail transaction without authentication (if server allows).
    ///
    /// # Errors
    ///
    /// Returns an error if the message exceeds the advertised SIZE or the
    /// MAIL FROM command fails.
    pub async fn mail_from(
        self,
        from: Address,
        size: Option<usize>,
    ) -> Result<Client<MailTransaction>> {
        self.begin_mail(from, size).await
    }
}

impl Client<Authenticated> {
    /// Starts a mail transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the message exceeds the advertised SIZE or the
    /// MAIL FROM command fails.
    pub async fn mail_from(
        self,
        from: Address,
        size: Option<usize>,
    ) -> Result<Client<MailTransaction>> {
        self.begin_mail(from, size).await
    }
}

impl Client<MailTransaction> {
    /// Adds the first recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Client<RecipientAdded>> {
        self.expect_success(Command::RcptTo { to }).await?;
        Ok(self.transition())
    }
}

impl Client<RecipientAdded> {
    /// Adds another recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Self> {
        self.expect_success(Command::RcptTo { to }).await?;
        Ok(self)
    }

    /// Begins sending message data.
    ///
    /// # Errors
    ///
    /// Returns an error if the DATA command fails.
    pub async fn data(mut self) -> Result<Client<Data>> {
        let reply = self.send_command(Command::Data).await?;
        if reply.code != ReplyCode::START_DATA {
            return Err(reject(&reply));
        }
        Ok(self.transition())
    }
}

impl Client<Data> {
    /// Sends the message content and completes the transaction.
    ///
    /// Line endings are normalized to CRLF, lines starting with `.` are
    /// stuffed and the terminating `.` line is added.
    ///
    /// # Errors
    ///
    /// Returns an error if sending the message fails or server rejects it.
    pub async fn send_message(mut self, message: &[u8]) -> Result<Client<Connected>> {
        let payload = dot_stuff(message);
        debug!(bytes = payload.len(), "Sending message data");
        self.stream.write_all(&payload).await?;

        let reply = read_reply(&mut self.stream).await?;
        debug!(code = reply.code.as_u16(), "S: {}", reply.text());
        if !reply.is_success() {
            return Err(reject(&reply));
        }

        Ok(self.transition())
    }
}

// Common implementation for all states
impl<S> Client<S> {
    /// Sends QUIT and closes the connection (available in any state).
    ///
    /// # Errors
    ///
    /// Returns an error if the QUIT command fails.
    pub async fn quit(mut self) -> Result<()> {
        let reply = self.send_command(Command::Quit).await?;
        if !reply.is_success() && reply.code != ReplyCode::CLOSING {
            return Err(reject(&reply));
        }
        Ok(())
    }

    async fn begin_mail(
        mut self,
        from: Address,
        size: Option<usize>,
    ) -> Result<Client<MailTransaction>> {
        if let (Some(size), Some(limit)) = (size, self.server_info.max_message_size())
            && limit > 0
            && size > limit
        {
            return Err(Error::MessageTooLarge { size, limit });
        }

        let size = size.filter(|_| self.server_info.supports_size());
        self.expect_success(Command::MailFrom { from, size }).await?;
        Ok(self.transition())
    }

    async fn expect_success(&mut self, cmd: Command) -> Result<Reply> {
        let reply = self.send_command(cmd).await?;
        if !reply.is_success() {
            return Err(reject(&reply));
        }
        Ok(reply)
    }

    async fn send_command(&mut self, cmd: Command) -> Result<Reply> {
        debug!("C: {cmd}");
        self.stream.write_all(&cmd.serialize()).await?;
        let reply = read_reply(&mut self.stream).await?;
        debug!(code = reply.code.as_u16(), "S: {}", reply.text());
        Ok(reply)
    }

    fn transition<T>(self) -> Client<T> {
        Client {
            stream: self.stream,
            server_info: self.server_info,
            client_name: self.client_name,
            _state: PhantomData,
        }
    }
}

async fn read_reply(stream: &mut SmtpStream) -> Result<Reply> {
    let mut lines = Vec::new();
    loop {
        let line = stream.read_line().await?;
        if line.is_empty() {
            continue;
        }

        let is_last = is_last_reply_line(&line);
        lines.push(line);

        if is_last {
            break;
        }
    }

    parse_reply(&lines)
}

fn parse_extensions(reply: &Reply) -> std::collections::HashSet<Extension> {
    // First line is the server's greeting text.
    reply
        .lines
        .iter()
        .skip(1)
        .map(|line| Extension::parse(line))
        .collect()
}

fn reject(reply: &Reply) -> Error {
    Error::smtp_error(reply.code.as_u16(), reply.text())
}

fn auth_failure(reply: &Reply) -> Error {
    Error::Auth {
        code: reply.code.as_u16(),
        message: reply.text(),
    }
}

/// Normalizes line endings to CRLF, stuffs leading dots and appends the
/// end-of-data marker.
fn dot_stuff(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + message.len() / 64 + 5);
    let body = message.strip_suffix(b"\n").unwrap_or(message);

    if !message.is_empty() {
        for line in body.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.first() == Some(&b'.') {
                out.push(b'.');
            }
            out.extend_from_slice(line);
            out.extend_from_slice(b"\r\n");
        }
    }

    out.extend_from_slice(b".\r\n");
    out
}
