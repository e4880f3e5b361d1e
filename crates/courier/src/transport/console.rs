//! Transport printing envelopes to standard error.

use super::{FromUrl, StreamTransport, Transport};
use crate::error::Result;
use crate::message::EmailMessage;
use async_trait::async_trait;
use tokio::io::Stderr;

/// [`StreamTransport`] over the process's standard error.
///
/// Prints full message content, so keep it to development setups.
#[derive(Debug)]
pub struct ConsoleTransport {
    inner: StreamTransport<Stderr>,
}

impl ConsoleTransport {
    /// Creates a transport writing to stderr.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: StreamTransport::new(tokio::io::stderr()),
        }
    }
}

impl Default for ConsoleTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        self.inner.send(message).await
    }
}

impl FromUrl for ConsoleTransport {
    fn try_default() -> Result<Self> {
        Ok(Self::new())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prints_without_error() {
        let message = EmailMessage::new()
            .from("dev@example.com")
            .unwrap()
            .subject("console")
            .text("shown on stderr");
        ConsoleTransport::new().send(&message).await.unwrap();
    }

    #[test]
    fn declines_url_and_falls_back() {
        let d = "console://".parse().unwrap();
        assert!(ConsoleTransport::from_url(&d).unwrap().is_none());
        assert!(ConsoleTransport::try_default().is_ok());
    }
}
