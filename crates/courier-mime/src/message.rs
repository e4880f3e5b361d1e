//! MIME message structure: a part tree that writes itself as RFC 5322 bytes.

use crate::content_type::{ContentType, format_parameter};
use crate::encoding::{
    decode_base64, decode_quoted_printable, encode_base64_lines, encode_quoted_printable,
};
use crate::error::{Error, Result};
use crate::header::Headers;
use std::fmt;

/// Longest line allowed in a 7bit body (RFC 5322 section 2.1.1).
const MAX_7BIT_LINE: usize = 998;

/// Headers that describe a part rather than the message as a whole.
const CONTENT_HEADERS: [&str; 4] = [
    "content-type",
    "content-transfer-encoding",
    "content-disposition",
    "content-id",
];

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit,
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// Body of a MIME part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Transfer-encoded bytes, written as is.
    Encoded(Vec<u8>),
    /// Child parts separated by `boundary`.
    Multipart {
        /// Boundary delimiter (without leading dashes).
        boundary: String,
        /// Child parts in output order.
        parts: Vec<Part>,
    },
}

/// MIME message part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    /// Part body.
    pub body: Body,
}

impl Part {
    /// Creates a new part.
    #[must_use]
    pub const fn new(headers: Headers, body: Body) -> Self {
        Self { headers, body }
    }

    /// Creates a text part.
    ///
    /// Line endings are normalized to CRLF. Short-lined ASCII text is sent as
    /// 7bit, anything else as quoted-printable.
    #[must_use]
    pub fn text(content_type: ContentType, text: &str) -> Self {
        let normalized = normalize_newlines(text);
        let plain = normalized.is_ascii()
            && normalized
                .split("\r\n")
                .all(|line| line.len() <= MAX_7BIT_LINE && !line.contains('\r'));

        let (encoding, body) = if plain {
            (TransferEncoding::SevenBit, normalized)
        } else {
            (
                TransferEncoding::QuotedPrintable,
                encode_quoted_printable(&normalized),
            )
        };

        let mut headers = Headers::new();
        headers.add("Content-Type", content_type.to_string());
        headers.add("Content-Transfer-Encoding", encoding.to_string());
        Self::new(headers, Body::Encoded(body.into_bytes()))
    }

    /// Creates a base64 encoded part holding arbitrary bytes.
    #[must_use]
    pub fn binary(content_type: ContentType, data: &[u8]) -> Self {
        let mut headers = Headers::new();
        headers.add("Content-Type", content_type.to_string());
        headers.add(
            "Content-Transfer-Encoding",
            TransferEncoding::Base64.to_string(),
        );
        Self::new(headers, Body::Encoded(encode_base64_lines(data).into_bytes()))
    }

    /// Creates an attachment part with a `Content-Disposition` file name.
    #[must_use]
    pub fn attachment(content_type: ContentType, file_name: &str, data: &[u8]) -> Self {
        let encoded_name = Headers::encode_value(file_name);
        let mut part = Self::binary(
            content_type.with_parameter("name", encoded_name.as_str()),
            data,
        );
        part.headers.add(
            "Content-Disposition",
            format!("attachment; {}", format_parameter("filename", &encoded_name)),
        );
        part
    }

    /// Creates a multipart container.
    #[must_use]
    pub fn multipart(sub_type: &str, boundary: impl Into<String>, parts: Vec<Self>) -> Self {
        let boundary = boundary.into();
        let mut headers = Headers::new();
        headers.add(
            "Content-Type",
            ContentType::multipart(sub_type, boundary.clone()).to_string(),
        );
        Self::new(headers, Body::Multipart { boundary, parts })
    }

    /// Gets the content type, defaulting to text/plain.
    ///
    /// # Errors
    ///
    /// Returns an error if content type header is invalid.
    pub fn content_type(&self) -> Result<ContentType> {
        self.headers
            .get("content-type")
            .map_or_else(|| Ok(ContentType::text_plain()), ContentType::parse)
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Decodes the body according to the transfer encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if the part is a multipart container or decoding fails.
    pub fn decode_body(&self) -> Result<Vec<u8>> {
        let Body::Encoded(body) = &self.body else {
            return Err(Error::NotSinglePart("multipart body has no single payload".to_string()));
        };

        match self.transfer_encoding() {
            TransferEncoding::Base64 => {
                let body_str = String::from_utf8_lossy(body);
                // Remove whitespace for lenient parsing
                let cleaned: String = body_str.chars().filter(|c| !c.is_whitespace()).collect();
                decode_base64(&cleaned)
            }
            TransferEncoding::QuotedPrintable => {
                let body_str = String::from_utf8_lossy(body);
                Ok(decode_quoted_printable(&body_str)?.into_bytes())
            }
            _ => Ok(body.clone()),
        }
    }

    /// Gets the decoded body as a string.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding or UTF-8 conversion fails.
    pub fn body_text(&self) -> Result<String> {
        let decoded = self.decode_body()?;
        String::from_utf8(decoded).map_err(Into::into)
    }

    /// Writes headers, the separating blank line and the body.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        self.headers.write_to(out);
        out.extend_from_slice(b"\r\n");
        self.write_body(out);
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        match &self.body {
            Body::Encoded(bytes) => out.extend_from_slice(bytes),
            Body::Multipart { boundary, parts } => {
                for part in parts {
                    out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
                    part.write_to(out);
                    out.extend_from_slice(b"\r\n");
                }
                out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
            }
        }
    }
}

/// MIME message: top-level headers and a root part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message headers (From, To, Subject, ...).
    pub headers: Headers,
    /// Root part; its headers describe the body (Content-Type, ...).
    pub root: Part,
}

impl Message {
    /// Creates a new message.
    #[must_use]
    pub const fn new(headers: Headers, root: Part) -> Self {
        Self { headers, root }
    }

    /// Serializes the message to RFC 5322 bytes with CRLF line endings.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.headers.write_to(&mut out);
        self.root.headers.write_to(&mut out);
        out.extend_from_slice(b"\r\n");
        self.root.write_body(&mut out);
        if !out.ends_with(b"\r\n") {
            out.extend_from_slice(b"\r\n");
        }
        out
    }

    /// Parses a message leniently.
    ///
    /// Header and body are split at the first empty line. Content headers are
    /// moved onto the root part; multipart bodies are not descended into.
    ///
    /// # Errors
    ///
    /// Returns an error if the header section is malformed.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let (head, body) = split_sections(raw);
        let all = Headers::parse(&String::from_utf8_lossy(head))?;

        let mut headers = Headers::new();
        let mut part_headers = Headers::new();
        for (name, value) in all.iter() {
            if CONTENT_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                part_headers.add(name, value);
            } else {
                headers.add(name, value);
            }
        }

        Ok(Self::new(
            headers,
            Part::new(part_headers, Body::Encoded(body.to_vec())),
        ))
    }

    /// Gets the From header.
    #[must_use]
    pub fn from(&self) -> Option<&str> {
        self.headers.get("from")
    }

    /// Gets the To header.
    #[must_use]
    pub fn to(&self) -> Option<&str> {
        self.headers.get("to")
    }

    /// Gets the Subject header.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.headers.get("subject")
    }
}

fn split_sections(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(pos) = find(raw, b"\r\n\r\n") {
        return (&raw[..pos], &raw[pos + 4..]);
    }
    if let Some(pos) = find(raw, b"\n\n") {
        return (&raw[..pos], &raw[pos + 2..]);
    }
    (raw, &[])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}
