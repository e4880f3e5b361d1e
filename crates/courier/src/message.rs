//! Message model: addresses, attachments and the email message itself.
//!
//! [`EmailMessage`] is plain data. Serialization to the standard envelope
//! format goes through `courier-mime` in [`EmailMessage::to_envelope`].

use crate::error::{Error, Result};
use courier_mime::{ContentType, Headers, Message, OCTET_STREAM, Part};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// Headers produced from the message fields; custom values for them are
/// ignored when serializing.
const GENERATED_HEADERS: &[&str] = &[
    "from",
    "to",
    "cc",
    "bcc",
    "reply-to",
    "subject",
    "date",
    "message-id",
    "mime-version",
    "content-type",
    "content-transfer-encoding",
];

/// An email address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "String", into = "String")
)]
pub struct Address {
    name: Option<String>,
    email: String,
}

impl Address {
    /// Creates an address from a bare `local@domain` string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Message`] if the address is not `local@domain`.
    pub fn new(email: impl Into<String>) -> Result<Self> {
        let email = email.into().trim().to_string();
        validate_email(&email)?;
        Ok(Self { name: None, email })
    }

    /// Creates an address with a display name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Message`] if the address is not `local@domain` or
    /// the name contains a line break.
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Result<Self> {
        let mut address = Self::new(email)?;
        let name = name.into();
        if name.contains(['\r', '\n']) {
            return Err(Error::Message(format!("Line break in display name: {name:?}")));
        }
        address.name = (!name.trim().is_empty()).then(|| name.trim().to_string());
        Ok(address)
    }

    /// Parses `user@example.com` or `Name <user@example.com>`.
    ///
    /// Quoted and RFC 2047 encoded display names are decoded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Message`] if the input is not a single address.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let Some(open) = input.rfind('<') else {
            return Self::new(input);
        };
        let email = input[open + 1..]
            .strip_suffix('>')
            .ok_or_else(|| Error::Message(format!("Invalid address: {input}")))?;

        let raw_name = input[..open].trim();
        let name = match raw_name
            .strip_prefix('"')
            .and_then(|n| n.strip_suffix('"'))
        {
            Some(quoted) => quoted.replace("\\\"", "\"").replace("\\\\", "\\"),
            None => Headers::decode_value(raw_name).unwrap_or_else(|_| raw_name.to_string()),
        };

        Self::with_name(name, email)
    }

    /// The bare `local@domain` part.
    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    /// The display name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The part after `@`.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.email
            .rsplit_once('@')
            .map_or(self.email.as_str(), |(_, domain)| domain)
    }
}

fn validate_email(email: &str) -> Result<()> {
    let invalid = || Error::Message(format!("Invalid address: {email:?}"));

    if email
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '<' | '>' | ','))
    {
        return Err(invalid());
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(())
        }
        _ => Err(invalid()),
    }
}

/// Header form: `"Name" <user@example.com>`, display name RFC 2047 encoded
/// when it is not ASCII.
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(name) = &self.name else {
            return f.write_str(&self.email);
        };

        if !name.is_ascii() || name.contains(|c: char| c.is_ascii_control()) {
            write!(f, "{} <{}>", Headers::encode_value(name), self.email)
        } else if name.contains(|c: char| "()<>[]:;@\\,.\"".contains(c)) {
            let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
            write!(f, "\"{escaped}\" <{}>", self.email)
        } else {
            write!(f, "{name} <{}>", self.email)
        }
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for Address {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl TryFrom<String> for Address {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// An ordered list of addresses.
///
/// Conversion target for the address setters of [`EmailMessage`]: a single
/// address becomes a one-element list, sequences keep their order and
/// duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressList(Vec<Address>);

impl AddressList {
    /// Parses every entry of `items`.
    ///
    /// # Errors
    ///
    /// Returns the first parse failure.
    pub fn parse_all<I, S>(items: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        items
            .into_iter()
            .map(|item| Address::parse(item.as_ref()))
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    /// Returns the addresses.
    #[must_use]
    pub fn into_inner(self) -> Vec<Address> {
        self.0
    }
}

impl From<Address> for AddressList {
    fn from(address: Address) -> Self {
        Self(vec![address])
    }
}

impl From<Vec<Address>> for AddressList {
    fn from(addresses: Vec<Address>) -> Self {
        Self(addresses)
    }
}

impl<const N: usize> From<[Address; N]> for AddressList {
    fn from(addresses: [Address; N]) -> Self {
        Self(addresses.into())
    }
}

impl TryFrom<&str> for AddressList {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Address::parse(value).map(Self::from)
    }
}

impl TryFrom<String> for AddressList {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::try_from(value.as_str())
    }
}

impl TryFrom<&[&str]> for AddressList {
    type Error = Error;

    fn try_from(value: &[&str]) -> Result<Self> {
        Self::parse_all(value)
    }
}

impl<const N: usize> TryFrom<[&str; N]> for AddressList {
    type Error = Error;

    fn try_from(value: [&str; N]) -> Result<Self> {
        Self::parse_all(value)
    }
}

impl TryFrom<Vec<&str>> for AddressList {
    type Error = Error;

    fn try_from(value: Vec<&str>) -> Result<Self> {
        Self::parse_all(value)
    }
}

impl TryFrom<Vec<String>> for AddressList {
    type Error = Error;

    fn try_from(value: Vec<String>) -> Result<Self> {
        Self::parse_all(value)
    }
}

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Attachment {
    /// Raw bytes.
    pub content: Vec<u8>,
    /// File name shown to the recipient.
    pub file_name: String,
    /// MIME type, `application/octet-stream` when unknown.
    pub mime_type: String,
}

impl Attachment {
    /// Creates an attachment. `mime_type` defaults to
    /// `application/octet-stream`.
    #[must_use]
    pub fn new(
        file_name: impl Into<String>,
        content: impl Into<Vec<u8>>,
        mime_type: Option<&str>,
    ) -> Self {
        Self {
            content: content.into(),
            file_name: file_name.into(),
            mime_type: mime_type.unwrap_or(OCTET_STREAM).to_string(),
        }
    }

    fn to_part(&self) -> Part {
        let content_type = ContentType::parse(&self.mime_type).unwrap_or_default();
        Part::attachment(content_type, &self.file_name, &self.content)
    }
}

/// An email message.
///
/// ```
/// use courier::EmailMessage;
///
/// # fn main() -> courier::Result<()> {
/// let message = EmailMessage::new()
///     .from("Sender <sender@example.com>")?
///     .to(["a@example.com", "b@example.com"])?
///     .subject("Hello")
///     .text("Hi there");
///
/// assert_eq!(message.to.len(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EmailMessage {
    /// Sender. Required at send time.
    pub from_address: Option<Address>,
    /// Primary recipients.
    pub to: Vec<Address>,
    /// Carbon-copy recipients.
    pub cc: Vec<Address>,
    /// Blind carbon-copy recipients. Never written into the envelope.
    pub bcc: Vec<Address>,
    /// Reply-To addresses.
    pub reply_to: Vec<Address>,
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub text_body: Option<String>,
    /// HTML body.
    pub html_body: Option<String>,
    /// Attachments in order.
    pub attachments: Vec<Attachment>,
    /// Custom headers in insertion order.
    pub headers: Headers,
}

impl EmailMessage {
    /// Creates an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sender.
    ///
    /// # Errors
    ///
    /// Returns an error if the address does not parse.
    pub fn from<A>(mut self, address: A) -> Result<Self>
    where
        A: TryInto<Address>,
        Error: From<A::Error>,
    {
        self.from_address = Some(address.try_into()?);
        Ok(self)
    }

    /// Replaces the primary recipients.
    ///
    /// # Errors
    ///
    /// Returns an error if an address does not parse.
    pub fn to<A>(mut self, addresses: A) -> Result<Self>
    where
        A: TryInto<AddressList>,
        Error: From<A::Error>,
    {
        self.to = addresses.try_into()?.into_inner();
        Ok(self)
    }

    /// Replaces the carbon-copy recipients.
    ///
    /// # Errors
    ///
    /// Returns an error if an address does not parse.
    pub fn cc<A>(mut self, addresses: A) -> Result<Self>
    where
        A: TryInto<AddressList>,
        Error: From<A::Error>,
    {
        self.cc = addresses.try_into()?.into_inner();
        Ok(self)
    }

    /// Replaces the blind carbon-copy recipients.
    ///
    /// # Errors
    ///
    /// Returns an error if an address does not parse.
    pub fn bcc<A>(mut self, addresses: A) -> Result<Self>
    where
        A: TryInto<AddressList>,
        Error: From<A::Error>,
    {
        self.bcc = addresses.try_into()?.into_inner();
        Ok(self)
    }

    /// Replaces the Reply-To addresses.
    ///
    /// # Errors
    ///
    /// Returns an error if an address does not parse.
    pub fn reply_to<A>(mut self, addresses: A) -> Result<Self>
    where
        A: TryInto<AddressList>,
        Error: From<A::Error>,
    {
        self.reply_to = addresses.try_into()?.into_inner();
        Ok(self)
    }

    /// Sets the subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Sets the plain text body.
    #[must_use]
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.text_body = Some(body.into());
        self
    }

    /// Sets the HTML body.
    #[must_use]
    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.html_body = Some(body.into());
        self
    }

    /// Appends a custom header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Appends an attachment. `mime_type` defaults to
    /// `application/octet-stream`.
    pub fn attach(
        &mut self,
        file_name: impl Into<String>,
        content: impl Into<Vec<u8>>,
        mime_type: Option<&str>,
    ) -> &mut Self {
        self.attachments
            .push(Attachment::new(file_name, content, mime_type));
        self
    }

    /// Reads a file and appends it as an attachment, guessing the MIME type
    /// from the extension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read.
    pub async fn attach_file(&mut self, path: impl AsRef<Path>) -> Result<&mut Self> {
        let path = path.as_ref();
        let content = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map_or_else(|| "attachment".to_string(), |n| n.to_string_lossy().into_owned());
        let mime_type = mime_guess::from_path(path).first_or_octet_stream();

        Ok(self.attach(file_name, content, Some(mime_type.essence_str())))
    }

    /// All envelope recipients: to, then cc, then bcc.
    #[must_use]
    pub fn recipients(&self) -> Vec<&Address> {
        self.to.iter().chain(&self.cc).chain(&self.bcc).collect()
    }

    /// Fixes the `Date` and `Message-ID` headers if they are absent, so that
    /// later serializations produce identical bytes.
    pub fn stamp(&mut self) -> &mut Self {
        if !self.headers.contains("Date") {
            self.headers.add("Date", chrono::Utc::now().to_rfc2822());
        }
        if !self.headers.contains("Message-ID") {
            let id = new_message_id(self.from_address.as_ref());
            self.headers.add("Message-ID", id);
        }
        self
    }

    /// Serializes the message to RFC 5322 bytes.
    ///
    /// Unstamped messages get a fresh `Date` and `Message-ID` on every call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Message`] if the sender is missing or a custom
    /// header would not stay a single field.
    pub fn to_envelope(&self) -> Result<Vec<u8>> {
        let from = self
            .from_address
            .as_ref()
            .ok_or_else(|| Error::Message("missing from address".into()))?;
        for (name, value) in self.headers.iter() {
            Headers::check_field(name, value)?;
        }

        let date = self
            .headers
            .get("Date")
            .map_or_else(|| chrono::Utc::now().to_rfc2822(), str::to_string);
        let message_id = self
            .headers
            .get("Message-ID")
            .map_or_else(|| new_message_id(Some(from)), str::to_string);

        let mut headers = Headers::new();
        headers.add("From", from.to_string());
        for (name, list) in [("To", &self.to), ("Cc", &self.cc), ("Reply-To", &self.reply_to)] {
            if !list.is_empty() {
                headers.add(name, join_addresses(list));
            }
        }
        headers.add("Subject", Headers::encode_value(&self.subject));
        headers.add("Date", date);
        headers.add("Message-ID", message_id.clone());
        headers.add("MIME-Version", "1.0");
        for (name, value) in self.headers.iter() {
            if GENERATED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            if value.is_ascii() {
                headers.add(name, value);
            } else {
                headers.add(name, Headers::encode_value(value));
            }
        }

        let seed = boundary_seed(&message_id);
        let body = match (&self.text_body, &self.html_body) {
            (Some(text), Some(html)) => Part::multipart(
                "alternative",
                format!("=_alt_{seed}"),
                vec![
                    Part::text(ContentType::text_plain(), text),
                    Part::text(ContentType::text_html(), html),
                ],
            ),
            (None, Some(html)) => Part::text(ContentType::text_html(), html),
            (text, None) => Part::text(ContentType::text_plain(), text.as_deref().unwrap_or("")),
        };

        let root = if self.attachments.is_empty() {
            body
        } else {
            let parts = std::iter::once(body)
                .chain(self.attachments.iter().map(Attachment::to_part))
                .collect();
            Part::multipart("mixed", format!("=_mixed_{seed}"), parts)
        };

        Ok(Message::new(headers, root).to_bytes())
    }

    /// Reads a message back from RFC 5322 bytes.
    ///
    /// Only single-part bodies are decoded; a multipart body is kept verbatim
    /// as the text body. Headers not mapped to fields become custom headers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Message`] if the header section or an address is
    /// malformed.
    pub fn from_envelope(raw: &[u8]) -> Result<Self> {
        let parsed = Message::parse(raw)?;
        let mut message = Self::new();

        for (name, value) in parsed.headers.iter() {
            match name.to_ascii_lowercase().as_str() {
                "from" => {
                    message.from_address = parse_address_list(value)?.into_iter().next();
                }
                "to" => message.to.extend(parse_address_list(value)?),
                "cc" => message.cc.extend(parse_address_list(value)?),
                "bcc" => message.bcc.extend(parse_address_list(value)?),
                "reply-to" => message.reply_to.extend(parse_address_list(value)?),
                "subject" => {
                    message.subject =
                        Headers::decode_value(value).unwrap_or_else(|_| value.to_string());
                }
                "mime-version" => {}
                _ => message.headers.add(name, value),
            }
        }

        let content_type = parsed.root.content_type()?;
        if content_type.is_multipart() {
            message.text_body = Some(String::from_utf8_lossy(&parsed.root.decode_body()?).into_owned());
        } else {
            // The writer terminates the body with CRLF.
            let mut body = parsed.root.body_text()?;
            if body.ends_with("\r\n") {
                body.truncate(body.len() - 2);
            }
            if content_type.sub_type == "html" {
                message.html_body = Some(body);
            } else {
                message.text_body = Some(body);
            }
        }

        Ok(message)
    }
}

fn join_addresses(addresses: &[Address]) -> String {
    addresses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn new_message_id(from: Option<&Address>) -> String {
    let domain = from.map_or("localhost", Address::domain);
    format!("<{}@{domain}>", Uuid::new_v4().simple())
}

/// Boundary material derived from the Message-ID, so a stamped message
/// always serializes to the same bytes.
fn boundary_seed(message_id: &str) -> String {
    message_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(40)
        .collect()
}

/// Splits a header value at commas outside quotes and angle brackets.
fn parse_address_list(value: &str) -> Result<Vec<Address>> {
    let mut addresses = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut escaped = false;

    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' if !in_quotes && !in_angle => {
                push_address(&value[start..i], &mut addresses)?;
                start = i + 1;
            }
            _ => {}
        }
    }
    push_address(&value[start..], &mut addresses)?;

    Ok(addresses)
}

fn push_address(item: &str, addresses: &mut Vec<Address>) -> Result<()> {
    if !item.trim().is_empty() {
        addresses.push(Address::parse(item)?);
    }
    Ok(())
}
