//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Server identity and dispatcher limits.
    #[serde(default)]
    pub server: ServerConfig,

    /// HTTP transport settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Providers to load, in registration order.
    ///
    /// `None` means every builtin provider, in catalog order.
    #[serde(default)]
    pub providers: Option<IndexMap<String, ProviderConfig>>,

    /// Per-capability overrides, keyed by capability name.
    #[serde(default)]
    pub capabilities: IndexMap<String, CapabilityConfig>,
}

impl Config {
    /// Validates the configuration.
    ///
    /// Provider ids are checked separately against the provider catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.tool_timeout_secs == 0 {
            return Err(ConfigError::ValidationError {
                message: "server.tool_timeout_secs must be greater than zero".to_string(),
            });
        }
        if self.server.page_size == Some(0) {
            return Err(ConfigError::ValidationError {
                message: "server.page_size must be greater than zero".to_string(),
            });
        }
        if self.http.session_idle_secs == 0 || self.http.max_sessions == 0 {
            return Err(ConfigError::ValidationError {
                message: "http.session_idle_secs and http.max_sessions must be greater than zero".to_string(),
            });
        }
        if let Some((name, _)) = self
            .capabilities
            .iter()
            .find(|(_, c)| c.timeout_secs == Some(0))
        {
            return Err(ConfigError::ValidationError {
                message: format!("capabilities.{name}.timeout_secs must be greater than zero"),
            });
        }
        let format = self.logging.format.as_str();
        if format != "text" && format != "json" {
            return Err(ConfigError::ValidationError {
                message: format!("Invalid log format '{format}'. Must be one of: text, json"),
            });
        }
        Ok(())
    }
}

/// Server identity and dispatcher limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Name reported in `serverInfo`.
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Version reported in `serverInfo`. Defaults to the crate version.
    #[serde(default = "default_server_version")]
    pub version: String,

    /// Optional instructions returned from `initialize`.
    #[serde(default)]
    pub instructions: Option<String>,

    /// Page size for `*/list` results. `None` disables pagination.
    #[serde(default)]
    pub page_size: Option<usize>,

    /// Default invocation timeout in seconds.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            version: default_server_version(),
            instructions: None,
            page_size: None,
            tool_timeout_secs: default_tool_timeout(),
        }
    }
}

fn default_server_name() -> String {
    "MCP Learning Server".to_string()
}

fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

const fn default_tool_timeout() -> u64 {
    30
}

/// HTTP transport settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Serve `GET /metrics`.
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Sessions unused for this long are dropped.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,

    /// Upper bound on concurrently open sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Serve `POST /shutdown`.
    #[serde(default = "default_true")]
    pub enable_shutdown: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            enable_metrics: default_true(),
            allowed_origins: Vec::new(),
            session_idle_secs: default_session_idle_secs(),
            max_sessions: default_max_sessions(),
            enable_shutdown: default_true(),
        }
    }
}

const fn default_session_idle_secs() -> u64 {
    1800
}

const fn default_max_sessions() -> usize {
    1024
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8000
}

const fn default_true() -> bool {
    true
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "text" or "json".
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

/// One provider entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Whether the provider's capabilities are registered.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Provider-specific options, handed to the provider factory.
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            config: Map::new(),
        }
    }
}

/// Overrides for one capability.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CapabilityConfig {
    /// Whether the capability is registered.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Invocation timeout override in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Parameter default overrides.
    #[serde(default)]
    pub defaults: Map<String, Value>,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: None,
            defaults: Map::new(),
        }
    }
}
