//! # courier-mime
//!
//! Writes email envelopes in the standard RFC 5322 / MIME format and reads
//! simple ones back.
//!
//! ## Features
//!
//! - **Ordered headers**: insertion order is kept so output is stable
//! - **Part tree**: text, binary attachments and multipart containers
//! - **Encoding/Decoding**: Base64, Quoted-Printable, RFC 2047 header encoding
//! - **Lenient reader**: splits an envelope into headers and a single body
//!
//! ## Quick Start
//!
//! ```
//! use courier_mime::{ContentType, Headers, Message, Part};
//!
//! let mut headers = Headers::new();
//! headers.add("From", "sender@example.com");
//! headers.add("To", "recipient@example.com");
//! headers.add("Subject", "Test Message");
//!
//! let body = Part::multipart(
//!     "alternative",
//!     "boundary-1",
//!     vec![
//!         Part::text(ContentType::text_plain(), "Plain text version"),
//!         Part::text(ContentType::text_html(), "<h1>HTML version</h1>"),
//!     ],
//! );
//!
//! let bytes = Message::new(headers, body).to_bytes();
//! assert!(bytes.starts_with(b"From: sender@example.com\r\n"));
//! ```
//!
//! ### Encoding/Decoding
//!
//! ```
//! use courier_mime::encoding::{decode_rfc2047, encode_quoted_printable, encode_rfc2047};
//!
//! assert_eq!(encode_quoted_printable("a=b"), "a=3Db");
//!
//! let encoded = encode_rfc2047("Héllo", "utf-8");
//! assert_eq!(decode_rfc2047(&encoded).unwrap(), "Héllo");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod content_type;
mod error;
mod header;
mod message;

pub mod encoding;

pub use content_type::{ContentType, OCTET_STREAM};
pub use error::{Error, Result};
pub use header::Headers;
pub use message::{Body, Message, Part, TransferEncoding};
