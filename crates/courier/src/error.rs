//! Error types for courier.

use std::convert::Infallible;
use std::fmt;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline stage in which a plugin hook failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    /// The hook ran before the transport; nothing was sent.
    BeforeSend,
    /// The hook ran after the transport accepted the message.
    AfterSend,
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeforeSend => f.write_str("before send"),
            Self::AfterSend => f.write_str("after send"),
        }
    }
}

/// Errors that can occur while resolving transports or sending messages.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed connection string.
    #[error("Invalid connection string: {0}")]
    InvalidUrl(String),

    /// No transport is registered for the scheme.
    #[error("No transport registered for scheme '{0}'")]
    UnknownScheme(String),

    /// The transport could not be built from the connection string nor
    /// without arguments.
    #[error("Cannot create '{scheme}' transport: {reason}")]
    TransportInit {
        /// Scheme that was resolved.
        scheme: String,
        /// Why construction failed.
        reason: String,
    },

    /// A connection-string option has a value of the wrong type.
    #[error("Invalid value '{value}' for option '{key}'")]
    InvalidOption {
        /// Option name.
        key: String,
        /// Offending value.
        value: String,
    },

    /// The server could not be reached or the session broke down.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A network operation exceeded the configured timeout.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// TLS could not be negotiated.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The server refused the credentials.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The server refused the sender, a recipient or the message data.
    #[error("Server rejected the message ({code}): {message}")]
    Rejected {
        /// SMTP reply code.
        code: u16,
        /// Server reply text.
        message: String,
    },

    /// File or stream I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The message cannot be serialized or is missing required fields.
    #[error("Invalid message: {0}")]
    Message(String),

    /// Signing key or signature computation failed.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// A plugin hook failed.
    #[error("Plugin '{plugin}' failed {stage}: {source}")]
    Plugin {
        /// Stage the hook ran in.
        stage: HookStage,
        /// Name reported by the plugin.
        plugin: String,
        /// Error returned by the hook.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wraps an error returned by a plugin hook.
    #[must_use]
    pub fn plugin(stage: HookStage, plugin: impl Into<String>, source: Self) -> Self {
        Self::Plugin {
            stage,
            plugin: plugin.into(),
            source: Box::new(source),
        }
    }

    /// Returns true if the transport accepted the message before this error
    /// occurred (an after-send hook failed).
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(
            self,
            Self::Plugin {
                stage: HookStage::AfterSend,
                ..
            }
        )
    }
}

impl From<Infallible> for Error {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

impl From<courier_mime::Error> for Error {
    fn from(err: courier_mime::Error) -> Self {
        Self::Message(err.to_string())
    }
}

impl From<courier_smtp::Error> for Error {
    fn from(err: courier_smtp::Error) -> Self {
        use courier_smtp::Error as Smtp;

        match err {
            Smtp::Connect { .. } | Smtp::Io(_) | Smtp::ConnectionClosed | Smtp::Protocol(_) => {
                Self::Connection(err.to_string())
            }
            Smtp::Timeout(..) => Self::Timeout(err.to_string()),
            Smtp::Tls(message) => Self::Tls(message),
            Smtp::Auth { code, message } => Self::Authentication(format!("{code} {message}")),
            Smtp::SmtpError { code, message } => Self::Rejected { code, message },
            Smtp::InvalidAddress(_) | Smtp::MessageTooLarge { .. } => {
                Self::Message(err.to_string())
            }
            Smtp::NotSupported(ref feature) if feature.starts_with("STARTTLS") => {
                Self::Tls(err.to_string())
            }
            Smtp::NotSupported(ref feature) if feature.starts_with("AUTH") => {
                Self::Authentication(err.to_string())
            }
            Smtp::NotSupported(_) => Self::Connection(err.to_string()),
        }
    }
}
