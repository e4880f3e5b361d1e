//! # courier-smtp
//!
//! Minimal SMTP client (RFC 5321) driving one message per session.
//!
//! ## Features
//!
//! - **Type-state connection management**: invalid command orders do not
//!   compile
//! - **TLS**: implicit TLS (port 465) and STARTTLS, with optional client
//!   certificates
//! - **Authentication**: PLAIN, or LOGIN when only LOGIN is offered
//! - **Timeouts**: one limit covering connect and every read or write
//! - **Fallback**: HELO for servers that refuse EHLO
//!
//! ## Quick Start
//!
//! ```ignore
//! use courier_smtp::{Address, Client, ConnectOptions, connect};
//!
//! #[tokio::main]
//! async fn main() -> courier_smtp::Result<()> {
//!     let stream = connect("smtp.example.com", 587, &ConnectOptions::default()).await?;
//!     let client = Client::from_stream(stream).await?;
//!     let client = client.ehlo("client.example.com").await?;
//!     let client = client.starttls("smtp.example.com", &Default::default()).await?;
//!     let client = client.authenticate("user@example.com", "password").await?;
//!
//!     let client = client
//!         .mail_from(Address::new("sender@example.com")?, None)
//!         .await?;
//!     let client = client.rcpt_to(Address::new("recipient@example.com")?).await?;
//!     let client = client.data().await?;
//!     let client = client
//!         .send_message(b"Subject: Test\r\n\r\nHello, World!\r\n")
//!         .await?;
//!
//!     client.quit().await
//! }
//! ```
//!
//! ## Connection States
//!
//! ```text
//! Connected ── authenticate() ──→ Authenticated
//!     │                                │
//!     └──────── mail_from() ───────────┘
//!                   ↓
//!           MailTransaction ── rcpt_to() ──→ RecipientAdded ── data() ──→ Data
//!                                                                          │
//!           Connected ←──────────── send_message() ────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use connection::{
    Authenticated, Client, ConnectOptions, Connected, Data, MailTransaction, RecipientAdded,
    ServerInfo, SmtpConnection, SmtpStream, TlsOptions, connect,
};
pub use error::{Error, Result};
pub use types::{Address, AuthMechanism, Extension, Reply, ReplyCode, Severity};
