//! SMTP relay transport built on `courier-smtp`.

use super::{FromUrl, Transport};
use crate::error::{Error, Result};
use crate::message::{Address, EmailMessage};
use crate::url::{ConnectionDescriptor, OptionKind, OptionSpec};
use async_trait::async_trait;
use courier_smtp::{Client, ConnectOptions, TlsOptions};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 25;
const DEFAULT_HELO: &str = "localhost";

/// Delivers messages through an SMTP server, one session per message.
///
/// Each call to [`Transport::send`] opens a connection, optionally upgrades
/// it to TLS, authenticates when credentials are configured, submits the
/// envelope and closes the session.
///
/// # Example
///
/// ```rust,ignore
/// use courier::{SmtpTransport, Transport};
/// use std::time::Duration;
///
/// let transport = SmtpTransport::new("smtp.example.com", 587)
///     .with_start_tls(true)
///     .with_credentials("user", "secret")
///     .with_timeout(Some(Duration::from_secs(30)));
/// transport.send(&message).await?;
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpTransport {
    host: String,
    port: u16,
    user: Option<String>,
    password: Option<String>,
    implicit_tls: bool,
    start_tls: bool,
    timeout: Option<Duration>,
    tls: TlsOptions,
    helo: String,
}

impl SmtpTransport {
    /// Creates a transport for `host:port` without TLS or credentials.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            user: None,
            password: None,
            implicit_tls: false,
            start_tls: false,
            timeout: None,
            tls: TlsOptions::default(),
            helo: DEFAULT_HELO.to_string(),
        }
    }

    /// Authenticates with these credentials.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Negotiates TLS right after connecting.
    #[must_use]
    pub const fn with_implicit_tls(mut self, enabled: bool) -> Self {
        self.implicit_tls = enabled;
        self
    }

    /// Upgrades the session with STARTTLS.
    #[must_use]
    pub const fn with_start_tls(mut self, enabled: bool) -> Self {
        self.start_tls = enabled;
        self
    }

    /// Limits connecting and every network read or write.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Presents a client certificate. The key defaults to the certificate
    /// file when `None`.
    #[must_use]
    pub fn with_client_cert(mut self, cert: impl Into<PathBuf>, key: Option<PathBuf>) -> Self {
        self.tls = TlsOptions {
            client_cert: Some(cert.into()),
            client_key: key,
        };
        self
    }

    /// Name announced in EHLO.
    #[must_use]
    pub fn with_helo(mut self, name: impl Into<String>) -> Self {
        self.helo = name.into();
        self
    }

    /// Server host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Server port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Configured timeout.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether TLS is negotiated on connect.
    #[must_use]
    pub const fn implicit_tls(&self) -> bool {
        self.implicit_tls
    }

    /// Whether STARTTLS is used.
    #[must_use]
    pub const fn start_tls(&self) -> bool {
        self.start_tls
    }

    /// User name, if authenticating.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    async fn deliver(
        &self,
        from: courier_smtp::Address,
        recipients: &[courier_smtp::Address],
        envelope: &[u8],
    ) -> Result<()> {
        let Some((first, rest)) = recipients.split_first() else {
            return Err(Error::Message("message has no recipients".into()));
        };

        let options = ConnectOptions {
            timeout: self.timeout,
            implicit_tls: self.implicit_tls,
            tls: self.tls.clone(),
        };
        let stream = courier_smtp::connect(&self.host, self.port, &options).await?;
        let mut client = Client::from_stream(stream).await?.ehlo(&self.helo).await?;

        if self.start_tls {
            client = client.starttls(&self.host, &self.tls).await?;
        }

        let size = Some(envelope.len());
        let transaction = match &self.user {
            Some(user) => {
                let password = self.password.as_deref().unwrap_or_default();
                client
                    .authenticate(user, password)
                    .await?
                    .mail_from(from, size)
                    .await?
            }
            None => client.mail_from(from, size).await?,
        };

        let mut transaction = transaction.rcpt_to(first.clone()).await?;
        for recipient in rest {
            transaction = transaction.rcpt_to(recipient.clone()).await?;
        }

        let client = transaction.data().await?.send_message(envelope).await?;
        if let Err(e) = client.quit().await {
            debug!(error = %e, "QUIT failed after delivery");
        }
        Ok(())
    }
}

/// Recipients of To, Cc and Bcc without case-insensitive duplicates, in
/// first-seen order.
fn envelope_recipients(message: &EmailMessage) -> Result<Vec<courier_smtp::Address>> {
    let mut seen = HashSet::new();
    message
        .recipients()
        .into_iter()
        .filter(|address| seen.insert(address.email().to_ascii_lowercase()))
        .map(smtp_address)
        .collect()
}

fn smtp_address(address: &Address) -> Result<courier_smtp::Address> {
    Ok(courier_smtp::Address::new(address.email())?)
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let from = message
            .from_address
            .as_ref()
            .ok_or_else(|| Error::Message("missing from address".into()))?;
        let from = smtp_address(from)?;
        let recipients = envelope_recipients(message)?;
        let envelope = message.to_envelope()?;

        debug!(
            host = %self.host,
            port = self.port,
            recipients = recipients.len(),
            "Sending over SMTP"
        );
        self.deliver(from, &recipients, &envelope).await?;

        info!(
            host = %self.host,
            subject = %message.subject,
            "Message delivered over SMTP"
        );
        Ok(())
    }
}

impl FromUrl for SmtpTransport {
    const OPTIONS: &'static [OptionSpec] = &[
        OptionSpec::new("use_tls", OptionKind::Flag, Some("no")),
        OptionSpec::new("start_tls", OptionKind::Flag, Some("no")),
        OptionSpec::new("timeout", OptionKind::Integer, None),
        OptionSpec::new("cert_file", OptionKind::String, None),
        OptionSpec::new("key_file", OptionKind::String, None),
        OptionSpec::new("helo", OptionKind::String, Some(DEFAULT_HELO)),
    ];

    /// `smtp://[user[:password]@]host[:port][?options]`. A `timeout` of 0
    /// disables the limit.
    fn from_url(descriptor: &ConnectionDescriptor) -> Result<Option<Self>> {
        let mut transport = Self::new(
            descriptor.host().unwrap_or(DEFAULT_HOST),
            descriptor.port().unwrap_or(DEFAULT_PORT),
        )
        .with_implicit_tls(descriptor.flag("use_tls"))
        .with_start_tls(descriptor.flag("start_tls"))
        .with_timeout(
            descriptor
                .integer("timeout")?
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        );

        if let Some(user) = descriptor.user() {
            transport = transport.with_credentials(user, descriptor.password().unwrap_or_default());
        }
        if let Some(cert) = descriptor.string("cert_file") {
            transport =
                transport.with_client_cert(cert, descriptor.string("key_file").map(PathBuf::from));
        }
        if let Some(helo) = descriptor.string("helo") {
            transport = transport.with_helo(helo);
        }

        Ok(Some(transport))
    }

    fn try_default() -> Result<Self> {
        Ok(Self::new(DEFAULT_HOST, DEFAULT_PORT))
    }
}

impl fmt::Debug for SmtpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpTransport")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("implicit_tls", &self.implicit_tls)
            .field("start_tls", &self.start_tls)
            .field("timeout", &self.timeout)
            .field("tls", &self.tls)
            .field("helo", &self.helo)
            .finish()
    }
}
