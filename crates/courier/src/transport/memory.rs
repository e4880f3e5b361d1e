//! In-process mailbox, mostly for tests.

use super::{FromUrl, Transport};
use crate::error::Result;
use crate::message::EmailMessage;
use crate::url::{ConnectionDescriptor, OptionKind, OptionSpec};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Appends every sent message to a shared mailbox.
///
/// Clones share the same mailbox, so a test can keep one clone and hand
/// another to a [`Mailer`](crate::Mailer).
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    mailbox: Arc<Mutex<Vec<EmailMessage>>>,
}

impl InMemoryTransport {
    /// Creates a transport with an empty mailbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport whose mailbox starts with `messages`.
    #[must_use]
    pub fn with_messages(messages: impl IntoIterator<Item = EmailMessage>) -> Self {
        Self {
            mailbox: Arc::new(Mutex::new(messages.into_iter().collect())),
        }
    }

    /// Snapshot of the mailbox in send order.
    #[must_use]
    pub fn mailbox(&self) -> Vec<EmailMessage> {
        self.lock().clone()
    }

    /// Number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Empties the mailbox.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<EmailMessage>> {
        // A panic while holding the lock cannot leave the Vec half-written.
        self.mailbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let mut mailbox = self.lock();
        mailbox.push(message.clone());
        debug!(stored = mailbox.len(), "Message stored in memory");
        Ok(())
    }
}

impl FromUrl for InMemoryTransport {
    const OPTIONS: &'static [OptionSpec] =
        &[OptionSpec::new("storage", OptionKind::StringList, None)];

    /// Seeds the mailbox with every `storage` value, each read as an RFC 5322
    /// envelope.
    fn from_url(descriptor: &ConnectionDescriptor) -> Result<Option<Self>> {
        let seeded = descriptor
            .strings("storage")
            .iter()
            .map(|raw| EmailMessage::from_envelope(raw.as_bytes()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(Self::with_messages(seeded)))
    }

    fn try_default() -> Result<Self> {
        Ok(Self::new())
    }
}
