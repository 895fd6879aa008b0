//! Configuration loading and the reloadable configuration store.
//!
//! # Configuration File Locations
//!
//! The configuration file is searched in the following order:
//!
//! 1. Path specified on the command line
//! 2. Default location:
//!    - **Linux/macOS:** `~/.mcp-learning-server/config.json`
//!    - **Windows:** `%USERPROFILE%\.mcp-learning-server\config.json`
//!
//! A missing file at the default location is not an error: the server starts
//! with every builtin provider enabled. A missing explicit path is.
//!
//! # Reload
//!
//! [`ConfigStore::reload`] re-reads the source and builds a brand-new
//! [`RegistrySnapshot`]. Nothing is published until the whole build succeeds,
//! so a bad document leaves the live registry untouched.
//!
//! # Example Configuration
//!
//! See `config/example-config.json` for a complete example.

mod settings;

pub use settings::{CapabilityConfig, Config, HttpConfig, LoggingConfig, ProviderConfig, ServerConfig};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Map;

use crate::error::ConfigError;
use crate::provider::{Provider, ProviderCatalog};
use crate::registry::{CapabilityRegistry, RegistrySnapshot, SnapshotBuilder};

/// Returns the default configuration directory.
///
/// - **Linux/macOS:** `~/.mcp-learning-server/`
/// - **Windows:** `%USERPROFILE%\.mcp-learning-server\`
#[must_use]
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|p| p.join(".mcp-learning-server"))
}

/// Returns the platform-specific default configuration file path.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join("config.json"))
}

/// Where a configuration document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// A file that must exist.
    File(PathBuf),
    /// A file that is used if present, else defaults.
    OptionalFile(PathBuf),
    /// A document held in memory.
    Inline(String),
    /// Built-in defaults.
    Defaults,
}

impl ConfigSource {
    /// Picks the source for an optional command-line path.
    #[must_use]
    pub fn discover(path: Option<&Path>) -> Self {
        match (path, default_config_path()) {
            (Some(p), _) => Self::File(p.to_path_buf()),
            (None, Some(default)) => Self::OptionalFile(default),
            (None, None) => Self::Defaults,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(p) | Self::OptionalFile(p) => write!(f, "{}", p.display()),
            Self::Inline(_) => f.write_str("<inline>"),
            Self::Defaults => f.write_str("<defaults>"),
        }
    }
}

/// Loads and parses a configuration document.
///
/// # Errors
///
/// Returns an error if:
/// - An explicit configuration file cannot be found or read
/// - The JSON is malformed or has unknown fields
/// - A value fails validation
pub fn load_config(source: &ConfigSource) -> Result<Config, ConfigError> {
    let contents = match source {
        ConfigSource::File(path) => {
            if !path.exists() {
                return Err(ConfigError::NotFound { path: path.clone() });
            }
            read_file(path)?
        }
        ConfigSource::OptionalFile(path) => {
            if !path.exists() {
                tracing::debug!(path = %path.display(), "No configuration file, using defaults");
                return Ok(Config::default());
            }
            read_file(path)?
        }
        ConfigSource::Inline(text) => text.clone(),
        ConfigSource::Defaults => return Ok(Config::default()),
    };

    let config: Config = serde_json::from_str(&contents).map_err(|e| ConfigError::MalformedDocument {
        origin: source.to_string(),
        source: e,
    })?;

    config.validate()?;

    Ok(config)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Checks that every provider id in `config` has an implementation.
///
/// # Errors
///
/// Returns [`ConfigError::UnknownProvider`] for the first unknown id, enabled
/// or not.
pub fn check_providers(config: &Config, catalog: &ProviderCatalog) -> Result<(), ConfigError> {
    if let Some(providers) = &config.providers {
        if let Some(id) = providers.keys().find(|id| !catalog.contains(id)) {
            return Err(ConfigError::UnknownProvider { id: id.clone() });
        }
    }
    Ok(())
}

/// Instantiates the enabled providers of `config`, in registration order.
///
/// # Errors
///
/// Returns an error if an id is unknown or a provider rejects its options.
pub fn instantiate_providers(
    config: &Config,
    catalog: &ProviderCatalog,
) -> Result<Vec<Arc<dyn Provider>>, ConfigError> {
    match &config.providers {
        None => catalog
            .ids()
            .map(|id| catalog.instantiate(id, &Map::new()))
            .collect(),
        Some(providers) => providers
            .iter()
            .filter(|(id, entry)| {
                if !entry.enabled {
                    tracing::debug!(provider = %id, "Provider disabled by configuration");
                }
                entry.enabled
            })
            .map(|(id, entry)| catalog.instantiate(id, &entry.config))
            .collect(),
    }
}

/// Builds a complete snapshot for `config`.
///
/// # Errors
///
/// Returns the first error met; no partial snapshot is ever returned.
pub fn build_snapshot(config: &Config, catalog: &ProviderCatalog) -> Result<RegistrySnapshot, ConfigError> {
    check_providers(config, catalog)?;
    let providers = instantiate_providers(config, catalog)?;

    let mut builder = SnapshotBuilder::new(Duration::from_secs(config.server.tool_timeout_secs))
        .with_overrides(config.capabilities.clone());
    for provider in &providers {
        builder.add_provider(provider.as_ref())?;
    }
    Ok(builder.finish())
}

/// Owner of the configuration source and the active [`Config`].
#[derive(Debug)]
pub struct ConfigStore {
    source: ConfigSource,
    catalog: ProviderCatalog,
    active: RwLock<Arc<Config>>,
    reload_lock: Mutex<()>,
}

impl ConfigStore {
    /// Loads `source` and checks its provider ids against `catalog`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MalformedDocument`] on a syntax or schema error
    /// and [`ConfigError::UnknownProvider`] for an id with no implementation.
    pub fn load(source: ConfigSource, catalog: ProviderCatalog) -> Result<Self, ConfigError> {
        let config = load_config(&source)?;
        check_providers(&config, &catalog)?;

        tracing::info!(source = %source, "Configuration loaded");
        Ok(Self {
            source,
            catalog,
            active: RwLock::new(Arc::new(config)),
            reload_lock: Mutex::new(()),
        })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.active.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Where this store reads from.
    #[must_use]
    pub const fn source(&self) -> &ConfigSource {
        &self.source
    }

    /// The provider catalog used to resolve ids.
    #[must_use]
    pub const fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    /// Builds a snapshot from the active configuration.
    ///
    /// # Errors
    ///
    /// See [`build_snapshot`].
    pub fn snapshot(&self) -> Result<RegistrySnapshot, ConfigError> {
        build_snapshot(&self.config(), &self.catalog)
    }

    /// Re-reads the source and builds a new snapshot from it.
    ///
    /// The new configuration becomes active only if the snapshot builds.
    ///
    /// # Errors
    ///
    /// Returns the load or build error; the active configuration is unchanged.
    pub fn reload(&self) -> Result<RegistrySnapshot, ConfigError> {
        let config = load_config(&self.source)?;
        let snapshot = build_snapshot(&config, &self.catalog)?;
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        Ok(snapshot)
    }

    /// Reloads and publishes the result into `registry`.
    ///
    /// Concurrent calls are serialised so the last successful reload is the
    /// one left live.
    ///
    /// # Errors
    ///
    /// Returns the reload error; the registry keeps its previous snapshot.
    pub fn reload_into(&self, registry: &CapabilityRegistry) -> Result<Arc<RegistrySnapshot>, ConfigError> {
        let _guard = self.reload_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match registry.try_publish(|| self.reload()) {
            Ok(snapshot) => {
                tracing::info!(source = %self.source, version = snapshot.version(), "Configuration reloaded");
                Ok(snapshot)
            }
            Err(e) => {
                tracing::warn!(source = %self.source, error = %e, "Reload rejected; keeping previous snapshot");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::capability::CapabilityKind;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_explicit_file_is_not_found() {
        let err = load_config(&ConfigSource::File("/definitely/not/here.json".into())).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn missing_optional_file_uses_defaults() {
        let config = load_config(&ConfigSource::OptionalFile("/definitely/not/here.json".into())).unwrap();
        assert!(config.providers.is_none());
    }

    #[test]
    fn syntax_error_is_malformed_document() {
        let err = load_config(&ConfigSource::Inline("{ not json".into())).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedDocument { origin, .. } if origin == "<inline>"));
    }

    #[test]
    fn unknown_provider_fails_load() {
        let source = ConfigSource::Inline(r#"{"providers": {"scraper": {"enabled": false}}}"#.into());
        let err = ConfigStore::load(source, ProviderCatalog::builtin()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProvider { id } if id == "scraper"));
    }

    #[test]
    fn defaults_enable_every_builtin_provider() {
        let store = ConfigStore::load(ConfigSource::Defaults, ProviderCatalog::builtin()).unwrap();
        let snap = store.snapshot().unwrap();
        assert!(snap.get(CapabilityKind::Tool, "calculate").is_some());
        assert!(snap.get(CapabilityKind::Tool, "create_file").is_some());
        assert!(snap.get(CapabilityKind::Resource, "system_info").is_some());
        assert!(snap.get(CapabilityKind::Prompt, "code_review").is_some());
    }

    #[test]
    fn provider_order_follows_document() {
        let source = ConfigSource::Inline(
            r#"{"providers": {"prompts": {}, "calculator": {}, "file-ops": {"enabled": false}}}"#.into(),
        );
        let store = ConfigStore::load(source, ProviderCatalog::builtin()).unwrap();
        let snap = store.snapshot().unwrap();
        assert_eq!(snap.names(CapabilityKind::Tool)[0], "calculate");
        assert!(snap.get(CapabilityKind::Tool, "create_file").is_none());
        assert_eq!(snap.len(CapabilityKind::Resource), 0);
    }

    #[test]
    fn reload_picks_up_file_changes() {
        let file = write_config(r#"{"providers": {"calculator": {}}}"#);
        let store = ConfigStore::load(ConfigSource::File(file.path().to_path_buf()), ProviderCatalog::builtin())
            .unwrap();
        let registry = CapabilityRegistry::with_snapshot(store.snapshot().unwrap());
        assert_eq!(registry.current().len(CapabilityKind::Prompt), 0);

        std::fs::write(file.path(), r#"{"providers": {"calculator": {}, "prompts": {}}}"#).unwrap();
        let snap = store.reload_into(&registry).unwrap();
        assert_eq!(snap.version(), 2);
        assert_eq!(registry.current().len(CapabilityKind::Prompt), 5);
    }

    #[test]
    fn failed_reload_keeps_previous_state() {
        let file = write_config(r#"{"providers": {"calculator": {}}}"#);
        let store = ConfigStore::load(ConfigSource::File(file.path().to_path_buf()), ProviderCatalog::builtin())
            .unwrap();
        let registry = CapabilityRegistry::with_snapshot(store.snapshot().unwrap());

        std::fs::write(file.path(), r#"{"providers": {"calculator": {}, "browser": {}}}"#).unwrap();
        let err = store.reload_into(&registry).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProvider { .. }));
        assert_eq!(registry.current().version(), 1);
        assert!(store.config().providers.as_ref().unwrap().get("browser").is_none());
    }

    #[test]
    fn example_config_builds() {
        let source = ConfigSource::Inline(include_str!("../../config/example-config.json").to_string());
        let store = ConfigStore::load(source, ProviderCatalog::builtin()).unwrap();
        let snap = store.snapshot().unwrap();
        assert!(snap.get(CapabilityKind::Tool, "delete_file").is_none());

        let search = snap.get(CapabilityKind::Tool, "search_in_files").unwrap();
        assert_eq!(search.timeout, Duration::from_secs(10));
        assert_eq!(store.config().server.page_size, Some(50));
    }
}
