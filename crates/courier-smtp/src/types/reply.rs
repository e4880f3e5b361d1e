//! Server replies.

use std::fmt;

/// A complete, possibly multiline, server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Three-digit status.
    pub code: ReplyCode,
    /// Text after the code, one entry per reply line.
    pub lines: Vec<String>,
}

impl Reply {
    /// Creates a reply.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(code: ReplyCode, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// True for 2xx replies.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code.severity(), Severity::Completion)
    }

    /// Reply text on one line, for logs and error messages.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }
}

/// First digit of a reply code (RFC 5321 section 4.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// 2yz: the command was accepted.
    Completion,
    /// 3yz: more input is expected.
    Intermediate,
    /// 4yz: failed, may succeed later.
    Transient,
    /// 5yz: failed for good.
    Permanent,
    /// Any other first digit.
    Unknown,
}

/// Three-digit reply status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// 220, greeting and STARTTLS go-ahead.
    pub const SERVICE_READY: Self = Self(220);
    /// 221, answer to QUIT.
    pub const CLOSING: Self = Self(221);
    /// 235, credentials accepted.
    pub const AUTH_SUCCEEDED: Self = Self(235);
    /// 250
    pub const OK: Self = Self(250);
    /// 334, server challenge during AUTH.
    pub const AUTH_CONTINUE: Self = Self(334);
    /// 354, send the message data.
    pub const START_DATA: Self = Self(354);

    /// Wraps a numeric code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Numeric value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Class of the reply.
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self.0 / 100 {
            2 => Severity::Completion,
            3 => Severity::Intermediate,
            4 => Severity::Transient,
            5 => Severity::Permanent,
            _ => Severity::Unknown,
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
