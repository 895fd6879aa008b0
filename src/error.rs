//! Error types for mcp-learning-server.
//!
//! Three families, matching where a failure can surface:
//!
//! - [`ConfigError`]: building a registry from a configuration document. Fatal at
//!   start-up, recoverable at reload (the previous snapshot stays live).
//! - [`ProtocolError`]: malformed or out-of-order JSON-RPC traffic. Always answered
//!   with a JSON-RPC error.
//! - [`InvocationError`]: looking up, validating or running a capability.
//!
//! # Security Note
//!
//! [`InvocationError::Internal`] carries detail for the log only. The wire
//! representation uses a generic message (see `mcp::protocol`).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::capability::CapabilityKind;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// The configuration document is not valid JSON or does not match the schema.
    #[error("malformed configuration document ({origin}): {source}")]
    MalformedDocument {
        /// Where the document came from (a path or `<inline>`).
        origin: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A provider id in the configuration has no matching implementation.
    #[error("unknown provider '{id}'")]
    UnknownProvider {
        /// The provider id as written in the configuration.
        id: String,
    },

    /// Two enabled providers declare a capability with the same name and kind.
    #[error("duplicate {kind} '{name}' declared by provider '{provider}' (already registered by '{existing}')")]
    DuplicateCapability {
        /// Capability kind.
        kind: CapabilityKind,
        /// Capability name.
        name: String,
        /// Provider that attempted the second registration.
        provider: String,
        /// Provider that registered it first.
        existing: String,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Protocol-level failures, reported as JSON-RPC errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The message is not a valid request in the current session state.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The method is not served by this dispatcher.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// The request parameters are malformed.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// No protocol version is supported by both sides.
    #[error("unsupported protocol version '{requested}'")]
    NegotiationFailed {
        /// Version the client asked for.
        requested: String,
        /// Versions this server speaks.
        supported: Vec<&'static str>,
    },
}

/// Failures while resolving or running a capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    /// No capability of this kind with this name in the current snapshot.
    #[error("{kind} not found: {name}")]
    NotFound {
        /// Capability kind.
        kind: CapabilityKind,
        /// Requested name (or URI for resources).
        name: String,
    },

    /// Arguments do not satisfy the parameter schema.
    #[error("{0}")]
    InvalidParams(String),

    /// The handler did not finish within its time budget.
    #[error("'{name}' timed out after {}ms", .after.as_millis())]
    Timeout {
        /// Capability name.
        name: String,
        /// Budget that was exceeded.
        after: Duration,
    },

    /// The handler ran and reported a failure of its own.
    #[error("{0}")]
    HandlerFailure(String),

    /// The handler panicked or its result could not be encoded.
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let error = ConfigError::NotFound {
            path: PathBuf::from("/path/to/config.json"),
        };
        let msg = error.to_string();
        assert!(msg.contains("not found"));
        assert!(msg.contains("config.json"));
    }

    #[test]
    fn duplicate_capability_names_both_providers() {
        let error = ConfigError::DuplicateCapability {
            kind: CapabilityKind::Tool,
            name: "calculate".to_string(),
            provider: "b".to_string(),
            existing: "a".to_string(),
        };
        let msg = error.to_string();
        assert!(msg.contains("tool 'calculate'"));
        assert!(msg.contains("'a'"));
        assert!(msg.contains("'b'"));
    }

    #[test]
    fn timeout_display_in_millis() {
        let error = InvocationError::Timeout {
            name: "slow".to_string(),
            after: Duration::from_millis(250),
        };
        assert_eq!(error.to_string(), "'slow' timed out after 250ms");
    }
}
