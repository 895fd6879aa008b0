//! Building a [`RegistrySnapshot`] from providers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;

use super::{RegisteredCapability, RegistrySnapshot};
use crate::capability::{CapabilityDescriptor, CapabilityKind};
use crate::config::CapabilityConfig;
use crate::error::ConfigError;
use crate::provider::Provider;

/// Accumulates descriptors into a fresh snapshot.
///
/// The first duplicate name within a kind aborts the build; the caller drops
/// the builder and nothing is published.
#[derive(Debug)]
pub struct SnapshotBuilder {
    snapshot: RegistrySnapshot,
    default_timeout: Duration,
    overrides: IndexMap<String, CapabilityConfig>,
    applied: HashSet<String>,
}

impl SnapshotBuilder {
    /// Creates a builder whose capabilities default to `default_timeout`.
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            snapshot: RegistrySnapshot::empty(),
            default_timeout,
            overrides: IndexMap::new(),
            applied: HashSet::new(),
        }
    }

    /// Sets per-capability overrides, keyed by capability name.
    #[must_use]
    pub fn with_overrides(mut self, overrides: IndexMap<String, CapabilityConfig>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Registers every descriptor of `provider`, in the order it lists them.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the provider cannot produce
    /// its descriptors, or any error from [`add`](Self::add).
    pub fn add_provider(&mut self, provider: &dyn Provider) -> Result<(), ConfigError> {
        let id = provider.id().to_string();
        let descriptors = provider
            .descriptors()
            .map_err(|message| ConfigError::ValidationError {
                message: format!("provider '{id}': {message}"),
            })?;

        tracing::debug!(provider = %id, count = descriptors.len(), "Registering provider");
        for descriptor in descriptors {
            self.add(&id, descriptor)?;
        }
        Ok(())
    }

    /// Registers one descriptor on behalf of `provider`.
    ///
    /// Disabled capabilities are skipped. Configured default overrides are
    /// applied before the descriptor is stored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateCapability`] if the name (or, for a
    /// resource, the URI pattern) is already taken, and
    /// [`ConfigError::ValidationError`] if an override does not fit the
    /// descriptor's parameters.
    pub fn add(&mut self, provider: &str, descriptor: CapabilityDescriptor) -> Result<(), ConfigError> {
        let kind = descriptor.kind();
        let name = descriptor.name().to_string();

        if let Some(existing) = self.snapshot.get(kind, &name) {
            return Err(ConfigError::DuplicateCapability {
                kind,
                name,
                provider: provider.to_string(),
                existing: existing.provider.clone(),
            });
        }
        if kind == CapabilityKind::Resource {
            self.check_uri_unique(provider, &descriptor)?;
        }

        let mut timeout = self.default_timeout;
        let mut descriptor = descriptor;
        if let Some(cfg) = self.overrides.get(&name) {
            self.applied.insert(name.clone());
            if !cfg.enabled {
                tracing::debug!(%kind, name = %name, "Capability disabled by configuration");
                return Ok(());
            }
            if let Some(secs) = cfg.timeout_secs {
                timeout = Duration::from_secs(secs);
            }
            if !cfg.defaults.is_empty() {
                descriptor = descriptor
                    .with_default_overrides(&cfg.defaults)
                    .map_err(|message| ConfigError::ValidationError { message })?;
            }
        }

        self.snapshot.map_mut(kind).insert(
            name,
            Arc::new(RegisteredCapability {
                descriptor,
                provider: provider.to_string(),
                timeout,
            }),
        );
        Ok(())
    }

    fn check_uri_unique(&self, provider: &str, descriptor: &CapabilityDescriptor) -> Result<(), ConfigError> {
        let Some(uri) = descriptor.uri() else {
            return Ok(());
        };
        let clash = self
            .snapshot
            .list(CapabilityKind::Resource)
            .find(|r| r.descriptor.uri().is_some_and(|u| u == uri));

        match clash {
            Some(existing) => Err(ConfigError::DuplicateCapability {
                kind: CapabilityKind::Resource,
                name: uri.as_str().to_string(),
                provider: provider.to_string(),
                existing: existing.provider.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Finishes the build. The snapshot's version is assigned on publish.
    #[must_use]
    pub fn finish(self) -> RegistrySnapshot {
        for name in self.overrides.keys() {
            if !self.applied.contains(name) {
                tracing::warn!(capability = %name, "Override names no registered capability; ignoring");
            }
        }
        self.snapshot
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use super::*;
    use crate::capability::{handler_fn, InvocationResult, ParamSpec, ParamType};
    use crate::provider::StaticProvider;

    fn calculate() -> CapabilityDescriptor {
        CapabilityDescriptor::tool("calculate", handler_fn(|_| async { InvocationResult::text("4") }))
            .with_param(ParamSpec::required("expression", ParamType::String))
            .with_param(ParamSpec::optional("precision", ParamType::Integer).with_default(json!(10)))
    }

    #[test]
    fn duplicate_across_providers_fails() {
        let first = StaticProvider::new("calculator", vec![calculate()]);
        let second = StaticProvider::new("math-extra", vec![calculate()]);

        let mut builder = SnapshotBuilder::new(Duration::from_secs(30));
        builder.add_provider(&first).unwrap();
        let err = builder.add_provider(&second).unwrap_err();

        match err {
            ConfigError::DuplicateCapability {
                kind,
                name,
                provider,
                existing,
            } => {
                assert_eq!(kind, CapabilityKind::Tool);
                assert_eq!(name, "calculate");
                assert_eq!(provider, "math-extra");
                assert_eq!(existing, "calculator");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn same_name_different_kind_is_allowed() {
        let prompt = CapabilityDescriptor::prompt("calculate", handler_fn(|_| async { InvocationResult::text("") }));
        let provider = StaticProvider::new("mixed", vec![calculate(), prompt]);

        let mut builder = SnapshotBuilder::new(Duration::from_secs(30));
        builder.add_provider(&provider).unwrap();
        let snap = builder.finish();
        assert_eq!(snap.len(CapabilityKind::Tool), 1);
        assert_eq!(snap.len(CapabilityKind::Prompt), 1);
    }

    #[test]
    fn duplicate_resource_uri_fails() {
        let noop = || handler_fn(|_| async { InvocationResult::text("") });
        let provider = StaticProvider::new(
            "res",
            vec![
                CapabilityDescriptor::resource("one", "mem://{key}", noop()).unwrap(),
                CapabilityDescriptor::resource("two", "mem://{key}", noop()).unwrap(),
            ],
        );
        let mut builder = SnapshotBuilder::new(Duration::from_secs(30));
        assert!(matches!(
            builder.add_provider(&provider),
            Err(ConfigError::DuplicateCapability { name, .. }) if name == "mem://{key}"
        ));
    }

    #[test]
    fn overrides_apply_timeout_defaults_and_disable() {
        let mut overrides = IndexMap::new();
        let mut defaults = Map::new();
        defaults.insert("precision".into(), json!(4));
        overrides.insert(
            "calculate".to_string(),
            CapabilityConfig {
                enabled: true,
                timeout_secs: Some(5),
                defaults,
            },
        );
        overrides.insert(
            "echo".to_string(),
            CapabilityConfig {
                enabled: false,
                ..CapabilityConfig::default()
            },
        );

        let echo = CapabilityDescriptor::tool("echo", handler_fn(|_| async { InvocationResult::text("") }));
        let provider = StaticProvider::new("p", vec![calculate(), echo]);
        let mut builder = SnapshotBuilder::new(Duration::from_secs(30)).with_overrides(overrides);
        builder.add_provider(&provider).unwrap();
        let snap = builder.finish();

        assert!(snap.get(CapabilityKind::Tool, "echo").is_none());
        let calc = snap.get(CapabilityKind::Tool, "calculate").unwrap();
        assert_eq!(calc.timeout, Duration::from_secs(5));
        assert_eq!(calc.descriptor.params()[1].default, Some(json!(4)));
    }

    #[test]
    fn override_for_undeclared_parameter_rejected() {
        let mut defaults = Map::new();
        defaults.insert("radix".into(), json!(2));
        let mut overrides = IndexMap::new();
        overrides.insert(
            "calculate".to_string(),
            CapabilityConfig {
                defaults,
                ..CapabilityConfig::default()
            },
        );

        let provider = StaticProvider::new("p", vec![calculate()]);
        let mut builder = SnapshotBuilder::new(Duration::from_secs(30)).with_overrides(overrides);
        assert!(matches!(
            builder.add_provider(&provider),
            Err(ConfigError::ValidationError { .. })
        ));
    }
}
