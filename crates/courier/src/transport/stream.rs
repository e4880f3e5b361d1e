//! Transport writing envelopes into a caller-supplied sink.

use super::{FromUrl, Transport};
use crate::error::{Error, Result};
use crate::message::EmailMessage;
use async_trait::async_trait;
use std::fmt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

/// Writes each envelope followed by a blank line into a writer.
///
/// The sink is flushed after every message and never closed. Writes are
/// serialized, so concurrent sends do not interleave.
pub struct StreamTransport<W> {
    sink: Mutex<W>,
}

impl<W> StreamTransport<W>
where
    W: AsyncWrite + Send + Unpin,
{
    /// Wraps a writer.
    pub fn new(sink: W) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    /// Returns the writer.
    pub fn into_inner(self) -> W {
        self.sink.into_inner()
    }
}

impl<W> fmt::Debug for StreamTransport<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTransport")
            .field("sink", &std::any::type_name::<W>())
            .finish()
    }
}

#[async_trait]
impl<W> Transport for StreamTransport<W>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let envelope = message.to_envelope()?;

        let mut sink = self.sink.lock().await;
        sink.write_all(&envelope).await?;
        sink.write_all(b"\r\n").await?;
        sink.flush().await?;

        debug!(bytes = envelope.len(), "Message written to stream");
        Ok(())
    }
}

/// A live stream handle cannot be expressed in a connection string.
impl<W> FromUrl for StreamTransport<W>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    fn try_default() -> Result<Self> {
        Err(Error::TransportInit {
            scheme: "stream".into(),
            reason: "a writable sink must be supplied by the caller".into(),
        })
    }
}
