//! Transport contract and built-in drivers.
//!
//! A [`Transport`] delivers one message per call. Types that can be built
//! from a connection string also implement [`FromUrl`]; the registry reaches
//! them through the object-safe [`TransportFactory`].

mod console;
mod file;
mod memory;
mod null;
mod smtp;
mod stream;

pub use console::ConsoleTransport;
pub use file::FileTransport;
pub use memory::InMemoryTransport;
pub use null::NullTransport;
pub use smtp::SmtpTransport;
pub use stream::StreamTransport;

use crate::error::{Error, Result};
use crate::message::EmailMessage;
use crate::url::{ConnectionDescriptor, OptionSpec};
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A delivery driver.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use courier::{EmailMessage, Result, Transport};
///
/// #[derive(Debug)]
/// struct Webhook;
///
/// #[async_trait]
/// impl Transport for Webhook {
///     async fn send(&self, message: &EmailMessage) -> Result<()> {
///         // Post the envelope somewhere
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Any + Send + Sync + fmt::Debug {
    /// Delivers the message once.
    ///
    /// Returns `Ok(())` if the channel accepted the message.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

impl dyn Transport {
    /// Returns the concrete transport if it is a `T`.
    ///
    /// Lets callers reach driver specific accessors on a resolved transport:
    ///
    /// ```
    /// use courier::{InMemoryTransport, Registry};
    ///
    /// let transport = Registry::with_builtins().resolve("memory://").unwrap();
    /// let outbox = transport.downcast_ref::<InMemoryTransport>().unwrap();
    /// assert!(outbox.is_empty());
    /// ```
    #[must_use]
    pub fn downcast_ref<T: Transport>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref::<T>()
    }

    /// Returns true if the concrete transport is a `T`.
    #[must_use]
    pub fn is<T: Transport>(&self) -> bool {
        (self as &dyn Any).is::<T>()
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        (**self).send(message).await
    }
}

/// Construction of a transport from a connection string.
pub trait FromUrl: Transport + Sized + 'static {
    /// Options understood by [`FromUrl::from_url`].
    const OPTIONS: &'static [OptionSpec] = &[];

    /// Builds the transport from a descriptor, or returns `Ok(None)` when
    /// the descriptor is not meaningful for it.
    ///
    /// # Errors
    ///
    /// Returns an error if an option value is unusable.
    fn from_url(descriptor: &ConnectionDescriptor) -> Result<Option<Self>> {
        let _ = descriptor;
        Ok(None)
    }

    /// Builds the transport without arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportInit`] if the transport needs state that
    /// only the caller can supply.
    fn try_default() -> Result<Self>;
}

/// Object-safe constructor stored in the registry.
///
/// Implemented for every [`FromUrl`] type through [`UrlFactory`] and for
/// closures `Fn(&ConnectionDescriptor) -> Result<Option<Arc<dyn Transport>>>`.
pub trait TransportFactory: Send + Sync {
    /// First resolution step.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor is unusable.
    fn from_url(&self, descriptor: &ConnectionDescriptor) -> Result<Option<Arc<dyn Transport>>>;

    /// Fallback used when [`TransportFactory::from_url`] declines.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportInit`] by default.
    fn try_default(&self) -> Result<Arc<dyn Transport>> {
        Err(Error::TransportInit {
            scheme: String::new(),
            reason: "no zero-argument construction available".into(),
        })
    }
}

/// [`TransportFactory`] for a [`FromUrl`] type.
pub struct UrlFactory<T>(PhantomData<fn() -> T>);

impl<T> UrlFactory<T> {
    /// Creates the factory.
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for UrlFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for UrlFactory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UrlFactory<{}>", std::any::type_name::<T>())
    }
}

impl<T: FromUrl> TransportFactory for UrlFactory<T> {
    fn from_url(&self, descriptor: &ConnectionDescriptor) -> Result<Option<Arc<dyn Transport>>> {
        descriptor.check_options(T::OPTIONS)?;
        Ok(T::from_url(descriptor)?.map(|t| Arc::new(t) as Arc<dyn Transport>))
    }

    fn try_default(&self) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(T::try_default()?))
    }
}

impl<F> TransportFactory for F
where
    F: Fn(&ConnectionDescriptor) -> Result<Option<Arc<dyn Transport>>> + Send + Sync,
{
    fn from_url(&self, descriptor: &ConnectionDescriptor) -> Result<Option<Arc<dyn Transport>>> {
        self(descriptor)
    }
}
