//! Scheme to transport factory mapping.

use crate::error::{Error, Result};
use crate::transport::{
    ConsoleTransport, FileTransport, FromUrl, InMemoryTransport, NullTransport, SmtpTransport,
    Transport, TransportFactory, UrlFactory,
};
use crate::url::ConnectionDescriptor;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// What to resolve: a connection string or an already parsed descriptor.
#[derive(Debug, Clone)]
pub enum Target {
    /// Unparsed connection string.
    Url(String),
    /// Parsed descriptor.
    Descriptor(ConnectionDescriptor),
}

impl From<&str> for Target {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<String> for Target {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

impl From<ConnectionDescriptor> for Target {
    fn from(descriptor: ConnectionDescriptor) -> Self {
        Self::Descriptor(descriptor)
    }
}

impl From<&ConnectionDescriptor> for Target {
    fn from(descriptor: &ConnectionDescriptor) -> Self {
        Self::Descriptor(descriptor.clone())
    }
}

/// Maps URL schemes to transport factories.
///
/// Built once at startup and shared read-only afterwards. Schemes are
/// case-insensitive; registering a scheme again replaces its factory.
///
/// ```
/// use courier::Registry;
///
/// let registry = Registry::with_builtins();
/// let transport = registry.resolve("null://").unwrap();
/// ```
#[derive(Clone)]
pub struct Registry {
    factories: HashMap<String, Arc<dyn TransportFactory>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Creates a registry with `smtp`, `file`, `null`, `memory` and
    /// `console` registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register::<SmtpTransport>("smtp")
            .register::<FileTransport>("file")
            .register::<NullTransport>("null")
            .register::<InMemoryTransport>("memory")
            .register::<ConsoleTransport>("console");
        registry
    }

    /// Registers a [`FromUrl`] transport type under `scheme`.
    pub fn register<T: FromUrl>(&mut self, scheme: &str) -> &mut Self {
        self.register_factory(scheme, UrlFactory::<T>::new())
    }

    /// Registers any factory under `scheme`, including closures.
    pub fn register_factory(
        &mut self,
        scheme: &str,
        factory: impl TransportFactory + 'static,
    ) -> &mut Self {
        let scheme = scheme.to_ascii_lowercase();
        if self
            .factories
            .insert(scheme.clone(), Arc::new(factory))
            .is_some()
        {
            debug!(%scheme, "Replaced transport factory");
        }
        self
    }

    /// Returns true if `scheme` has a factory.
    #[must_use]
    pub fn contains(&self, scheme: &str) -> bool {
        self.factories.contains_key(&scheme.to_ascii_lowercase())
    }

    /// Registered schemes, sorted.
    #[must_use]
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }

    /// Builds the transport for a connection string or descriptor.
    ///
    /// The factory's URL constructor runs first; if it declines, the
    /// zero-argument constructor is tried.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUrl`] if the string does not parse
    /// - [`Error::UnknownScheme`] if no factory is registered
    /// - [`Error::TransportInit`] if neither constructor produces a transport
    pub fn resolve(&self, target: impl Into<Target>) -> Result<Arc<dyn Transport>> {
        let descriptor = match target.into() {
            Target::Url(url) => ConnectionDescriptor::parse(&url)?,
            Target::Descriptor(descriptor) => descriptor,
        };
        let scheme = descriptor.scheme();

        let factory = self
            .factories
            .get(scheme)
            .ok_or_else(|| Error::UnknownScheme(scheme.to_string()))?;

        let built = match factory.from_url(&descriptor) {
            Ok(Some(transport)) => Ok(transport),
            Ok(None) => {
                debug!(%scheme, "URL constructor declined, trying default");
                factory.try_default()
            }
            Err(e) => Err(e),
        };

        built
            .inspect(|transport| debug!(url = %descriptor, ?transport, "Resolved transport"))
            .map_err(|e| Error::TransportInit {
                scheme: scheme.to_string(),
                reason: match e {
                    Error::TransportInit { reason, .. } => reason,
                    other => other.to_string(),
                },
            })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("schemes", &self.schemes())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::EmailMessage;

    #[test]
    fn builtins_are_registered() {
        let registry = Registry::with_builtins();
        assert_eq!(
            registry.schemes(),
            ["console", "file", "memory", "null", "smtp"]
        );
        assert!(registry.contains("SMTP"));
        assert!(!registry.contains("stream"));
    }

    #[test]
    fn empty_registry_knows_nothing() {
        let registry = Registry::new();
        assert!(matches!(
            registry.resolve("null://"),
            Err(Error::UnknownScheme(s)) if s == "null"
        ));
    }

    #[test]
    fn closures_are_factories() {
        let mut registry = Registry::new();
        registry.register_factory(
            "devnull",
            |_: &ConnectionDescriptor| -> Result<Option<Arc<dyn Transport>>> {
                Ok(Some(Arc::new(NullTransport)))
            },
        );
        assert!(registry.resolve("devnull://").is_ok());
    }

    #[test]
    fn declining_closure_without_default_fails() {
        let mut registry = Registry::new();
        registry.register_factory(
            "never",
            |_: &ConnectionDescriptor| -> Result<Option<Arc<dyn Transport>>> { Ok(None) },
        );
        assert!(matches!(
            registry.resolve("never://"),
            Err(Error::TransportInit { scheme, .. }) if scheme == "never"
        ));
    }

    #[test]
    fn factory_errors_become_init_errors() {
        let registry = Registry::with_builtins();
        let err = registry.resolve("smtp://mx?timeout=later").unwrap_err();
        match err {
            Error::TransportInit { scheme, reason } => {
                assert_eq!(scheme, "smtp");
                assert!(reason.contains("timeout"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn descriptor_targets_resolve() {
        let registry = Registry::with_builtins();
        let d: ConnectionDescriptor = "null://".parse().unwrap();
        assert!(registry.resolve(&d).is_ok());
        assert!(registry.resolve(d).is_ok());
    }

    #[tokio::test]
    async fn resolved_transport_sends() {
        let transport = Registry::default().resolve("null://").unwrap();
        transport.send(&EmailMessage::new()).await.unwrap();
    }
}
