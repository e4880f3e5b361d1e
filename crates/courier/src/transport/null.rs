//! Transport that discards every message.

use super::{FromUrl, Transport};
use crate::error::Result;
use crate::message::EmailMessage;
use async_trait::async_trait;
use tracing::debug;

/// Accepts and drops messages. Useful to disable delivery by configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        debug!(subject = %message.subject, "Discarding message");
        Ok(())
    }
}

impl FromUrl for NullTransport {
    fn try_default() -> Result<Self> {
        Ok(Self)
    }
}
