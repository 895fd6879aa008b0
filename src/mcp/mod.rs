//! Model Context Protocol (MCP) server implementation.
//!
//! The server speaks JSON-RPC 2.0 and exposes whatever the capability
//! registry currently holds. Transports only move bytes; every request goes
//! through the same [`Dispatcher`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         MCP Server                          │
//! │                                                             │
//! │   ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    │
//! │   │  Transport  │───▶│  Dispatcher │───▶│  Registry   │    │
//! │   │ (stdio/http)│    │  (session)  │    │ (snapshot)  │    │
//! │   └─────────────┘    └─────────────┘    └─────────────┘    │
//! │          │                  │                  │            │
//! │          ▼                  ▼                  ▼            │
//! │   ┌─────────────────────────────────────────────────┐      │
//! │   │       JSON-RPC Messages / Capability Handlers   │      │
//! │   └─────────────────────────────────────────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! Versions `2024-11-05`, `2025-03-26` and `2025-06-18` are supported. The
//! server answers with the newest supported version not later than the one
//! the client requested.

pub mod dispatcher;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use dispatcher::{Dispatcher, DispatcherSettings};
pub use metrics::{Metrics, MetricsSnapshot};
pub use protocol::{JsonRpcReply, LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS};
pub use server::McpServer;
pub use session::{Session, SessionState};
