//! Capability providers.
//!
//! A provider is a named bundle of [`CapabilityDescriptor`]s. Providers are
//! created from their configuration options by a factory registered in the
//! [`ProviderCatalog`]; the catalog is how a provider id in the configuration
//! document is resolved to an implementation.
//!
//! Builtin providers:
//!
//! | id           | kind(s)            |
//! |--------------|--------------------|
//! | `calculator` | tools              |
//! | `file-ops`   | tools, resources   |
//! | `system`     | resources          |
//! | `prompts`    | prompts            |

pub mod calculator;
pub mod file_ops;
pub mod prompts;
pub mod system;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::capability::CapabilityDescriptor;
use crate::error::ConfigError;

/// A named, independently loadable bundle of capabilities.
pub trait Provider: Send + Sync {
    /// Provider id, as used in the configuration document.
    fn id(&self) -> &str;

    /// The capabilities this provider offers.
    ///
    /// # Errors
    ///
    /// Returns a message if a descriptor cannot be built.
    fn descriptors(&self) -> Result<Vec<CapabilityDescriptor>, String>;
}

/// A provider with a fixed descriptor list.
pub struct StaticProvider {
    id: String,
    descriptors: Vec<CapabilityDescriptor>,
}

impl StaticProvider {
    /// Creates a provider serving exactly `descriptors`.
    #[must_use]
    pub fn new(id: impl Into<String>, descriptors: Vec<CapabilityDescriptor>) -> Self {
        Self {
            id: id.into(),
            descriptors,
        }
    }
}

impl Provider for StaticProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn descriptors(&self) -> Result<Vec<CapabilityDescriptor>, String> {
        Ok(self.descriptors.clone())
    }
}

type Factory = dyn Fn(&Map<String, Value>) -> Result<Arc<dyn Provider>, String> + Send + Sync;

/// Maps provider ids to factories.
#[derive(Clone, Default)]
pub struct ProviderCatalog {
    factories: IndexMap<String, Arc<Factory>>,
}

impl fmt::Debug for ProviderCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

impl ProviderCatalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The builtin providers, in their default registration order.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new()
            .with(calculator::PROVIDER_ID, |opts| {
                calculator::CalculatorProvider::from_options(opts).map(|p| Arc::new(p) as Arc<dyn Provider>)
            })
            .with(file_ops::PROVIDER_ID, |opts| {
                file_ops::FileOpsProvider::from_options(opts).map(|p| Arc::new(p) as Arc<dyn Provider>)
            })
            .with(system::PROVIDER_ID, |opts| {
                system::SystemProvider::from_options(opts).map(|p| Arc::new(p) as Arc<dyn Provider>)
            })
            .with(prompts::PROVIDER_ID, |opts| {
                prompts::PromptsProvider::from_options(opts).map(|p| Arc::new(p) as Arc<dyn Provider>)
            })
    }

    /// Registers a factory. A later registration under the same id replaces the earlier one.
    #[must_use]
    pub fn with<F>(mut self, id: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Result<Arc<dyn Provider>, String> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Arc::new(factory));
        self
    }

    /// Registers a provider instance that ignores its options.
    #[must_use]
    pub fn with_provider(self, provider: Arc<dyn Provider>) -> Self {
        let id = provider.id().to_string();
        self.with(id, move |_| Ok(Arc::clone(&provider)))
    }

    /// Returns `true` if a factory is registered for `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Registered ids, in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Creates the provider registered under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownProvider`] for an unregistered id and
    /// [`ConfigError::ValidationError`] if the factory rejects the options.
    pub fn instantiate(
        &self,
        id: &str,
        options: &Map<String, Value>,
    ) -> Result<Arc<dyn Provider>, ConfigError> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| ConfigError::UnknownProvider { id: id.to_string() })?;
        factory(options).map_err(|message| ConfigError::ValidationError {
            message: format!("provider '{id}': {message}"),
        })
    }
}

/// Deserialises a provider's option map into its typed options.
pub(crate) fn parse_options<T: DeserializeOwned>(options: &Map<String, Value>) -> Result<T, String> {
    serde_json::from_value(Value::Object(options.clone())).map_err(|e| format!("invalid options: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{handler_fn, InvocationResult};

    #[test]
    fn builtin_catalog_order() {
        let catalog = ProviderCatalog::builtin();
        let ids: Vec<&str> = catalog.ids().collect();
        assert_eq!(ids, ["calculator", "file-ops", "system", "prompts"]);
    }

    #[test]
    fn unknown_provider_is_reported() {
        let err = ProviderCatalog::builtin()
            .instantiate("scraper", &Map::new())
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::UnknownProvider { id } if id == "scraper"));
    }

    #[test]
    fn rejected_options_are_validation_errors() {
        let mut opts = Map::new();
        opts.insert("bogus".into(), Value::Bool(true));
        let err = ProviderCatalog::builtin()
            .instantiate("calculator", &opts)
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn static_provider_round_trip() {
        let tool = CapabilityDescriptor::tool("echo", handler_fn(|_| async { InvocationResult::text("") }));
        let catalog = ProviderCatalog::new().with_provider(Arc::new(StaticProvider::new("echo", vec![tool])));
        let provider = catalog.instantiate("echo", &Map::new()).unwrap();
        assert_eq!(provider.id(), "echo");
        assert_eq!(provider.descriptors().unwrap().len(), 1);
    }
}
