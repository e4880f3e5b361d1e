//! EHLO keywords.

/// A service extension advertised in the EHLO reply.
///
/// Only the keywords the client acts on get their own variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// `STARTTLS` (RFC 3207).
    StartTls,
    /// `AUTH` with the mechanisms this client can speak.
    Auth(Vec<AuthMechanism>),
    /// `SIZE`, with the advertised limit in bytes if any (RFC 1870).
    Size(Option<usize>),
    /// Anything else, kept verbatim.
    Other(String),
}

impl Extension {
    /// Parses one EHLO line (without the reply code).
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let keyword = words.next().map(str::to_ascii_uppercase);

        match keyword.as_deref() {
            Some("STARTTLS") => Self::StartTls,
            Some("AUTH") => Self::Auth(words.filter_map(AuthMechanism::parse).collect()),
            // A limit of 0 means no fixed maximum.
            Some("SIZE") => Self::Size(
                words
                    .next()
                    .and_then(|limit| limit.parse().ok())
                    .filter(|limit| *limit > 0),
            ),
            _ => Self::Other(line.trim().to_string()),
        }
    }
}

/// SASL mechanisms supported by [`Client::authenticate`](crate::Client).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// `PLAIN` (RFC 4616).
    Plain,
    /// `LOGIN`, the pre-standard two-step exchange.
    Login,
}

impl AuthMechanism {
    /// Mechanism for a name in the EHLO `AUTH` line. Mechanisms this client
    /// cannot use yield `None`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("PLAIN") {
            Some(Self::Plain)
        } else if name.eq_ignore_ascii_case("LOGIN") {
            Some(Self::Login)
        } else {
            None
        }
    }

    /// Name used in the `AUTH` command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(Extension::parse("starttls"), Extension::StartTls);
        assert_eq!(
            Extension::parse("auth login"),
            Extension::Auth(vec![AuthMechanism::Login])
        );
    }

    #[test]
    fn auth_keeps_usable_mechanisms_in_order() {
        assert_eq!(
            Extension::parse("AUTH CRAM-MD5 LOGIN XOAUTH2 PLAIN"),
            Extension::Auth(vec![AuthMechanism::Login, AuthMechanism::Plain])
        );
    }

    #[test]
    fn size_limit() {
        assert_eq!(Extension::parse("SIZE 35882577"), Extension::Size(Some(35_882_577)));
        assert_eq!(Extension::parse("SIZE 0"), Extension::Size(None));
        assert_eq!(Extension::parse("SIZE"), Extension::Size(None));
    }

    #[test]
    fn other_lines_are_kept() {
        assert_eq!(
            Extension::parse("8BITMIME"),
            Extension::Other("8BITMIME".to_string())
        );
        assert_eq!(Extension::parse(""), Extension::Other(String::new()));
    }
}
