//! MIME encoding and decoding utilities.
//!
//! Supports Base64, Quoted-Printable, and RFC 2047 header encoding.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt::Write as _;

/// Maximum encoded line length for transfer encodings (RFC 2045).
pub const MAX_LINE_LENGTH: usize = 76;

/// Raw bytes carried by one RFC 2047 encoded word (60 Base64 characters).
const ENCODED_WORD_BYTES: usize = 45;

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Encodes data as Base64 wrapped at 76 columns with CRLF line breaks.
#[must_use]
pub fn encode_base64_lines(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut result = String::with_capacity(encoded.len() + encoded.len() / MAX_LINE_LENGTH * 2);
    for (i, chunk) in encoded.as_bytes().chunks(MAX_LINE_LENGTH).enumerate() {
        if i > 0 {
            result.push_str("\r\n");
        }
        // Base64 output is pure ASCII.
        result.push_str(&String::from_utf8_lossy(chunk));
    }
    result
}

/// Decodes Base64 data.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    STANDARD.decode(data).map_err(Into::into)
}

/// Encodes text using Quoted-Printable encoding (RFC 2045).
///
/// Line breaks in the input (LF or CRLF) become hard CRLF breaks; long lines
/// get soft breaks so that no encoded line exceeds 76 characters.
#[must_use]
pub fn encode_quoted_printable(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for (index, line) in text.split('\n').enumerate() {
        if index > 0 {
            result.push_str("\r\n");
        }
        let line = line.strip_suffix('\r').unwrap_or(line);
        encode_qp_line(line.as_bytes(), &mut result);
    }

    result
}

fn encode_qp_line(line: &[u8], out: &mut String) {
    let mut line_length = 0;
    let last = line.len().saturating_sub(1);

    for (i, byte) in line.iter().enumerate() {
        let mut token = String::with_capacity(3);
        match byte {
            b'!'..=b'<' | b'>'..=b'~' => token.push(*byte as char),
            // Whitespace survives unless it would end the line.
            b' ' | b'\t' if i != last => token.push(*byte as char),
            _ => {
                let _ = write!(token, "={byte:02X}");
            }
        }

        // Leave room for the soft break marker.
        if line_length + token.len() > MAX_LINE_LENGTH - 1 {
            out.push_str("=\r\n");
            line_length = 0;
        }
        line_length += token.len();
        out.push_str(&token);
    }
}

/// Decodes Quoted-Printable text (RFC 2045).
///
/// # Errors
///
/// Returns an error if the input contains invalid escape sequences or the
/// decoded bytes are not UTF-8.
pub fn decode_quoted_printable(text: &str) -> Result<String> {
    let bytes = text.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'=' {
            result.push(bytes[i]);
            i += 1;
            continue;
        }

        let rest = &bytes[i + 1..];
        if rest.starts_with(b"\r\n") {
            i += 3;
        } else if rest.starts_with(b"\n") {
            i += 2;
        } else if rest.is_empty() {
            i += 1;
        } else {
            let hex = rest
                .get(..2)
                .ok_or_else(|| Error::InvalidEncoding("Incomplete escape sequence".to_string()))?;
            let hex = std::str::from_utf8(hex)
                .map_err(|e| Error::InvalidEncoding(format!("Invalid hex: {e}")))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|e| Error::InvalidEncoding(format!("Invalid hex: {e}")))?;
            result.push(byte);
            i += 3;
        }
    }

    String::from_utf8(result).map_err(Into::into)
}

/// Returns true if a header value must be RFC 2047 encoded.
#[must_use]
pub fn needs_rfc2047(text: &str) -> bool {
    text.contains("=?") || text.chars().any(|c| !c.is_ascii() || (c.is_ascii_control() && c != '\t'))
}

/// Encodes a header value using RFC 2047 encoding.
///
/// Format: `=?charset?B?encoded-text?=`. Values that are plain printable
/// ASCII are returned unchanged; longer values are split into several
/// encoded words separated by spaces, never splitting a character.
#[must_use]
pub fn encode_rfc2047(text: &str, charset: &str) -> String {
    if !needs_rfc2047(text) {
        return text.to_string();
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for ch in text.chars() {
        if chunk.len() + ch.len_utf8() > ENCODED_WORD_BYTES {
            words.push(format!("=?{charset}?B?{}?=", encode_base64(chunk.as_bytes())));
            chunk.clear();
        }
        chunk.push(ch);
    }
    if !chunk.is_empty() {
        words.push(format!("=?{charset}?B?{}?=", encode_base64(chunk.as_bytes())));
    }

    words.join(" ")
}

/// Decodes RFC 2047 encoded words inside a header value.
///
/// Plain text is passed through; whitespace between two adjacent encoded
/// words is dropped.
///
/// # Errors
///
/// Returns an error if an encoded word uses an unknown encoding or its
/// payload is malformed.
pub fn decode_rfc2047(text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut previous_was_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);
        let Some((word, after)) = split_encoded_word(candidate) else {
            out.push_str(before);
            out.push_str("=?");
            rest = &candidate[2..];
            previous_was_word = false;
            continue;
        };

        if !(previous_was_word && before.trim().is_empty()) {
            out.push_str(before);
        }
        out.push_str(&decode_word(word)?);
        previous_was_word = true;
        rest = after;
    }

    out.push_str(rest);
    Ok(out)
}

/// An encoded word split into `(charset, encoding, payload)`.
type EncodedWord<'a> = (&'a str, &'a str, &'a str);

fn split_encoded_word(candidate: &str) -> Option<(EncodedWord<'_>, &str)> {
    let body = candidate.strip_prefix("=?")?;
    let mut parts = body.splitn(3, '?');
    let charset = parts.next()?;
    let encoding = parts.next()?;
    let remainder = parts.next()?;
    let end = remainder.find("?=")?;
    let payload = &remainder[..end];
    if charset.is_empty() || encoding.len() != 1 || payload.contains(char::is_whitespace) {
        return None;
    }
    Some(((charset, encoding, payload), &remainder[end + 2..]))
}

fn decode_word((_charset, encoding, payload): EncodedWord<'_>) -> Result<String> {
    match encoding.to_ascii_uppercase().as_str() {
        "B" => {
            let decoded = decode_base64(payload)?;
            Ok(String::from_utf8_lossy(&decoded).into_owned())
        }
        "Q" => decode_quoted_printable(&payload.replace('_', " ")),
        other => Err(Error::InvalidEncoding(format!("Unknown encoding: {other}"))),
    }
}
