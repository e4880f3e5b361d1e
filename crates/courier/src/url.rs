//! Connection strings.
//!
//! A transport is configured by a URL-shaped string:
//!
//! ```text
//! scheme://[user[:password]@][host[:port]][/path][?key=value[&key=value...]]
//! ```
//!
//! The parser fills in only what is present; defaults belong to the
//! transport that reads the descriptor. Each transport publishes its options
//! as an [`OptionSpec`] table.

use crate::error::{Error, Result};
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Values accepted as `true` by [`ConnectionDescriptor::flag`].
const TRUE_VALUES: &[&str] = &["yes", "1", "on", "true"];

/// Type of a connection-string option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// True iff the value is one of `yes`, `1`, `on`, `true`.
    Flag,
    /// Unsigned integer.
    Integer,
    /// Free text; the last value wins.
    String,
    /// Every value, in order.
    StringList,
}

/// One entry of a transport's option table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    /// Query key.
    pub name: &'static str,
    /// How the value is read.
    pub kind: OptionKind,
    /// Value used when the key is absent, for documentation.
    pub default: Option<&'static str>,
}

impl OptionSpec {
    /// Creates a table entry.
    #[must_use]
    pub const fn new(name: &'static str, kind: OptionKind, default: Option<&'static str>) -> Self {
        Self {
            name,
            kind,
            default,
        }
    }
}

/// Parsed connection string.
///
/// ```
/// use courier::ConnectionDescriptor;
///
/// let descriptor: ConnectionDescriptor = "smtp://u:p@host:2525?timeout=5&use_tls=1"
///     .parse()
///     .unwrap();
/// assert_eq!(descriptor.host(), Some("host"));
/// assert_eq!(descriptor.port(), Some(2525));
/// assert!(descriptor.flag("use_tls"));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    scheme: String,
    user: Option<String>,
    password: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: String,
    options: BTreeMap<String, Vec<String>>,
}

impl ConnectionDescriptor {
    /// Parses a connection string. Either a complete descriptor is returned
    /// or nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the string has no `://`, an empty
    /// scheme, or is otherwise malformed.
    pub fn parse(input: &str) -> Result<Self> {
        let Some((scheme, _)) = input.split_once("://") else {
            return Err(Error::InvalidUrl("missing '://' separator".into()));
        };
        if scheme.is_empty() {
            return Err(Error::InvalidUrl("empty scheme".into()));
        }

        let url = ::url::Url::parse(input).map_err(|e| Error::InvalidUrl(e.to_string()))?;

        // Hierarchical schemes such as `file` report "/" for a missing path.
        let authority_and_path = input[scheme.len() + 3..]
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        let path = if authority_and_path.contains('/') {
            decode(url.path())?
        } else {
            String::new()
        };

        let mut options: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value) in url.query_pairs() {
            options
                .entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }

        Ok(Self {
            scheme: url.scheme().to_ascii_lowercase(),
            user: Some(decode(url.username())?).filter(|u| !u.is_empty()),
            password: url.password().map(decode).transpose()?,
            host: url
                .host_str()
                .filter(|h| !h.is_empty())
                .map(str::to_string),
            port: url.port(),
            path,
            options,
        })
    }

    /// Lowercased scheme.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Decoded user name.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Decoded password.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Host, if one was given.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Port, if one was given.
    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        self.port
    }

    /// Decoded path, empty if absent.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// All query options.
    #[must_use]
    pub const fn options(&self) -> &BTreeMap<String, Vec<String>> {
        &self.options
    }

    /// Last value given for `key`.
    #[must_use]
    pub fn string(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .and_then(|values| values.last())
            .map(String::as_str)
    }

    /// Every value given for `key`, in order.
    #[must_use]
    pub fn strings(&self, key: &str) -> &[String] {
        self.options
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// True iff the value of `key` is `yes`, `1`, `on` or `true`
    /// (case-insensitive). Absent keys are false.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.string(key)
            .is_some_and(|value| TRUE_VALUES.iter().any(|t| value.trim().eq_ignore_ascii_case(t)))
    }

    /// Integer value of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] if the value is not an unsigned
    /// integer.
    pub fn integer(&self, key: &str) -> Result<Option<u64>> {
        self.string(key)
            .map(|value| {
                value.trim().parse().map_err(|_| Error::InvalidOption {
                    key: key.to_string(),
                    value: value.to_string(),
                })
            })
            .transpose()
    }

    /// Checks the options against a transport's table.
    ///
    /// Unknown keys are logged and otherwise ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] for an integer option that does not
    /// parse.
    pub fn check_options(&self, table: &[OptionSpec]) -> Result<()> {
        for key in self.options.keys() {
            match table.iter().find(|spec| spec.name == key.as_str()) {
                Some(spec) if spec.kind == OptionKind::Integer => {
                    self.integer(key)?;
                }
                Some(_) => {}
                None => warn!(scheme = %self.scheme, option = %key, "Ignoring unknown option"),
            }
        }
        Ok(())
    }
}

fn decode(raw: &str) -> Result<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| Error::InvalidUrl(format!("invalid percent-encoding: {e}")))
}

impl FromStr for ConnectionDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for ConnectionDescriptor {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

/// Connection string with the password masked.
impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        if let Some(user) = &self.user {
            write!(f, "{}", utf8_percent_encode(user, NON_ALPHANUMERIC))?;
            if self.password.is_some() {
                f.write_str(":****")?;
            }
            f.write_str("@")?;
        }
        if let Some(host) = &self.host {
            f.write_str(host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        f.write_str(&self.path)?;

        let mut separator = '?';
        for (key, values) in &self.options {
            for value in values {
                write!(
                    f,
                    "{separator}{}={}",
                    utf8_percent_encode(key, NON_ALPHANUMERIC),
                    utf8_percent_encode(value, NON_ALPHANUMERIC)
                )?;
                separator = '&';
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("scheme", &self.scheme)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_full_smtp_url() {
        let d = ConnectionDescriptor::parse("smtp://u:p@host:2525?timeout=5&use_tls=1").unwrap();
        assert_eq!(d.scheme(), "smtp");
        assert_eq!(d.user(), Some("u"));
        assert_eq!(d.password(), Some("p"));
        assert_eq!(d.host(), Some("host"));
        assert_eq!(d.port(), Some(2525));
        assert_eq!(d.path(), "");
        assert_eq!(d.string("timeout"), Some("5"));
        assert_eq!(d.string("use_tls"), Some("1"));
        assert_eq!(d.options().len(), 2);
    }

    #[test]
    fn missing_parts_stay_absent() {
        let d = ConnectionDescriptor::parse("null://").unwrap();
        assert_eq!(d.scheme(), "null");
        assert_eq!(d.user(), None);
        assert_eq!(d.password(), None);
        assert_eq!(d.host(), None);
        assert_eq!(d.port(), None);
        assert!(d.options().is_empty());
    }

    #[test]
    fn file_url_keeps_path() {
        let d = ConnectionDescriptor::parse("file:///tmp/mails").unwrap();
        assert_eq!(d.host(), None);
        assert_eq!(d.path(), "/tmp/mails");

        let bare = ConnectionDescriptor::parse("file://").unwrap();
        assert_eq!(bare.host(), None);
        assert_eq!(bare.path(), "");
    }

    #[test]
    fn scheme_is_lowercased() {
        let d = ConnectionDescriptor::parse("SMTP://mail.example.com").unwrap();
        assert_eq!(d.scheme(), "smtp");
    }

    #[test]
    fn credentials_are_percent_decoded() {
        let d = ConnectionDescriptor::parse("smtp://user%40corp:p%3Ass%2Fw@mx").unwrap();
        assert_eq!(d.user(), Some("user@corp"));
        assert_eq!(d.password(), Some("p:ss/w"));
    }

    #[test]
    fn repeated_keys_keep_all_values() {
        let d = ConnectionDescriptor::parse("memory://?storage=a&storage=b&storage=c").unwrap();
        assert_eq!(d.strings("storage"), ["a", "b", "c"]);
        assert_eq!(d.string("storage"), Some("c"));
        assert!(d.strings("missing").is_empty());
    }

    #[test]
    fn invalid_urls_are_rejected() {
        for bad in ["", "smtp", "smtp:/host", "://host", "smtp://host:99999", "1bad://x"] {
            assert!(
                matches!(ConnectionDescriptor::parse(bad), Err(Error::InvalidUrl(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn flag_values() {
        let d = ConnectionDescriptor::parse("smtp://h?a=yes&b=ON&c=true&d=1&e=no&f=2").unwrap();
        for key in ["a", "b", "c", "d"] {
            assert!(d.flag(key), "{key} should be set");
        }
        for key in ["e", "f", "missing"] {
            assert!(!d.flag(key), "{key} should not be set");
        }
    }

    #[test]
    fn integer_values() {
        let d = ConnectionDescriptor::parse("smtp://h?timeout=30&bad=soon").unwrap();
        assert_eq!(d.integer("timeout").unwrap(), Some(30));
        assert_eq!(d.integer("missing").unwrap(), None);
        assert!(matches!(
            d.integer("bad"),
            Err(Error::InvalidOption { key, value }) if key == "bad" && value == "soon"
        ));
    }

    #[test]
    fn check_options_validates_integers_only() {
        const TABLE: &[OptionSpec] = &[
            OptionSpec::new("timeout", OptionKind::Integer, None),
            OptionSpec::new("use_tls", OptionKind::Flag, Some("no")),
        ];
        let ok = ConnectionDescriptor::parse("smtp://h?timeout=3&use_tls=maybe&extra=1").unwrap();
        assert!(ok.check_options(TABLE).is_ok());

        let bad = ConnectionDescriptor::parse("smtp://h?timeout=x").unwrap();
        assert!(bad.check_options(TABLE).is_err());
    }

    #[test]
    fn password_is_redacted() {
        let d = ConnectionDescriptor::parse("smtp://user:hunter2@mx:25?helo=me").unwrap();
        assert_eq!(d.to_string(), "smtp://user:****@mx:25?helo=me");
        assert!(!format!("{d:?}").contains("hunter2"));
    }

    proptest! {
        #[test]
        fn credentials_survive_encoding(user in "\\PC{1,20}", password in "\\PC{0,20}") {
            let url = format!(
                "smtp://{}:{}@mail.example.com:587",
                utf8_percent_encode(&user, NON_ALPHANUMERIC),
                utf8_percent_encode(&password, NON_ALPHANUMERIC),
            );
            let d = ConnectionDescriptor::parse(&url).unwrap();
            prop_assert_eq!(d.user(), Some(user.as_str()));
            prop_assert_eq!(d.password().unwrap_or(""), password.as_str());
            prop_assert_eq!(d.port(), Some(587));
        }

        #[test]
        fn option_values_survive_encoding(value in "\\PC{0,30}") {
            let url = format!("memory://?storage={}", utf8_percent_encode(&value, NON_ALPHANUMERIC));
            let d = ConnectionDescriptor::parse(&url).unwrap();
            prop_assert_eq!(d.string("storage"), Some(value.as_str()));
        }
    }
}
