//! The façade combining a transport with a plugin pipeline.

use crate::error::{Error, HookStage, Result};
use crate::message::{Address, EmailMessage};
use crate::plugin::Plugin;
use crate::registry::{Registry, Target};
use crate::transport::Transport;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sends messages through one transport, running plugins around each send.
///
/// A mailer is immutable once built and can be shared across tasks.
///
/// # Example
///
/// ```
/// use courier::{EmailMessage, Mailer, Registry};
///
/// # async fn example() -> courier::Result<()> {
/// let mailer = Mailer::from_url(&Registry::with_builtins(), "null://")?;
///
/// let mut message = EmailMessage::new()
///     .from("app@example.com")?
///     .to("user@example.com")?
///     .subject("Welcome")
///     .text("Hello!");
/// mailer.send(&mut message).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Mailer {
    transport: Arc<dyn Transport>,
    plugins: Vec<Arc<dyn Plugin>>,
    from_address: Option<Address>,
}

impl Mailer {
    /// Creates a mailer without plugins.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            plugins: Vec::new(),
            from_address: None,
        }
    }

    /// Starts building a mailer around `transport`.
    #[must_use]
    pub fn builder(transport: Arc<dyn Transport>) -> MailerBuilder {
        MailerBuilder {
            mailer: Self::new(transport),
        }
    }

    /// Creates a mailer whose transport is resolved from a connection string.
    ///
    /// # Errors
    ///
    /// Returns the registry's resolution error.
    pub fn from_url(registry: &Registry, target: impl Into<Target>) -> Result<Self> {
        registry.resolve(target).map(Self::new)
    }

    /// The transport messages are handed to.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Plugins in execution order.
    #[must_use]
    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    /// Sender used for messages that have none.
    #[must_use]
    pub const fn from_address(&self) -> Option<&Address> {
        self.from_address.as_ref()
    }

    /// Sends one message.
    ///
    /// Before-send hooks run in order and may modify the message; the first
    /// failure aborts without calling the transport. After the transport
    /// accepts the message the after-send hooks run in order.
    ///
    /// # Errors
    ///
    /// - [`Error::Plugin`] with [`HookStage::BeforeSend`]: nothing was sent
    /// - any transport error: delivery failed
    /// - [`Error::Plugin`] with [`HookStage::AfterSend`]: the message was
    ///   delivered but a hook failed. Every after-send hook still runs; the
    ///   first failure is returned.
    pub async fn send(&self, message: &mut EmailMessage) -> Result<()> {
        if message.from_address.is_none() {
            message.from_address.clone_from(&self.from_address);
        }

        for plugin in &self.plugins {
            debug!(plugin = plugin.name(), "Running before-send hook");
            if let Err(e) = plugin.on_before_send(message).await {
                warn!(plugin = plugin.name(), error = %e, "Before-send hook failed");
                return Err(Error::plugin(HookStage::BeforeSend, plugin.name(), e));
            }
        }

        self.transport.send(message).await?;
        info!(
            transport = ?self.transport,
            subject = %message.subject,
            recipients = message.recipients().len(),
            "Message sent"
        );

        let mut failure = None;
        for plugin in &self.plugins {
            if let Err(e) = plugin.on_after_send(message).await {
                warn!(plugin = plugin.name(), error = %e, "After-send hook failed");
                failure.get_or_insert_with(|| {
                    Error::plugin(HookStage::AfterSend, plugin.name(), e)
                });
            }
        }
        failure.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for Mailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plugins: Vec<&str> = self.plugins.iter().map(|p| p.name()).collect();
        f.debug_struct("Mailer")
            .field("transport", &self.transport)
            .field("plugins", &plugins)
            .field("from_address", &self.from_address)
            .finish()
    }
}

/// Builder for [`Mailer`].
#[must_use]
pub struct MailerBuilder {
    mailer: Mailer,
}

impl MailerBuilder {
    /// Appends a plugin.
    pub fn plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.mailer.plugins.push(Arc::new(plugin));
        self
    }

    /// Appends shared plugins in order.
    pub fn plugins(mut self, plugins: impl IntoIterator<Item = Arc<dyn Plugin>>) -> Self {
        self.mailer.plugins.extend(plugins);
        self
    }

    /// Sender applied to messages without one.
    pub fn from_address(mut self, address: Address) -> Self {
        self.mailer.from_address = Some(address);
        self
    }

    /// Finishes the mailer.
    pub fn build(self) -> Mailer {
        self.mailer
    }
}

impl fmt::Debug for MailerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MailerBuilder").field(&self.mailer).finish()
    }
}

/// Resolves `target` with `registry` and wraps the transport in a
/// [`Mailer`].
///
/// # Errors
///
/// Returns the registry's resolution error.
pub fn create_mailer(registry: &Registry, target: impl Into<Target>) -> Result<Mailer> {
    Mailer::from_url(registry, target)
}
