//! mcp-learning-server: a Model Context Protocol server built around a
//! hot-reloadable capability registry
//!
//! Providers contribute tools, resources and prompts. A configuration file
//! decides which providers are enabled and may override per-capability
//! settings. The registry publishes immutable snapshots, so a reload never
//! disturbs calls already in flight.
//!
//! # Modules
//!
//! - [`capability`]: Capability descriptors, handlers and argument schemas
//! - [`config`]: Configuration loading, validation and reload
//! - [`error`]: Error types
//! - [`http`]: HTTP transport
//! - [`mcp`]: MCP protocol, sessions and the stdio transport
//! - [`provider`]: Built-in capability providers
//! - [`registry`]: Versioned capability snapshots

pub mod capability;
pub mod config;
pub mod error;
pub mod http;
pub mod mcp;
pub mod provider;
pub mod registry;
