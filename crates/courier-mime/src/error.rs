//! Errors raised while building or reading envelopes.

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Envelope errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A header line has no `name:` prefix.
    #[error("Malformed header line: {0}")]
    InvalidHeader(String),

    /// A `Content-Type` value is not `type/subtype`.
    #[error("Malformed content type: {0}")]
    InvalidContentType(String),

    /// Quoted-printable or RFC 2047 data is corrupt.
    #[error("Malformed encoded data: {0}")]
    InvalidEncoding(String),

    /// Base64 payload is corrupt.
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),

    /// Decoded text is not UTF-8.
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),

    /// The operation needs a single-payload part.
    #[error("Not a single part: {0}")]
    NotSinglePart(String),
}
