//! Per-connection session state.
//!
//! ```text
//! Unconnected ──connect──▶ Initializing ──initialize ok──▶ Ready
//!                               │                           │
//!                               └─initialize fails──▶ Closed ◀─close─┘
//! ```
//!
//! Requests on one session may run concurrently, so the state lives behind a
//! mutex and every transition is a single compare-and-set under it.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::error::ProtocolError;
use crate::mcp::protocol::SUPPORTED_PROTOCOL_VERSIONS;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, transport not yet attached.
    Unconnected,
    /// Transport attached, waiting for `initialize`.
    Initializing,
    /// Initialized; capability methods are served.
    Ready,
    /// Terminated. Nothing is served.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unconnected => "unconnected",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Picks the newest supported version that is not newer than `requested`.
///
/// Versions are ISO dates, so lexical order is chronological order.
///
/// # Errors
///
/// Returns [`ProtocolError::NegotiationFailed`] if every supported version is
/// newer than the request.
pub fn negotiate_version(requested: &str) -> Result<&'static str, ProtocolError> {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .rev()
        .find(|v| **v <= requested)
        .copied()
        .ok_or_else(|| ProtocolError::NegotiationFailed {
            requested: requested.to_string(),
            supported: SUPPORTED_PROTOCOL_VERSIONS.to_vec(),
        })
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    protocol_version: Option<&'static str>,
    client_info: Option<Value>,
    client_capabilities: Option<Value>,
    acknowledged: bool,
}

/// Protocol state for one client connection.
#[derive(Debug)]
pub struct Session {
    id: String,
    inner: Mutex<Inner>,
}

impl Session {
    /// Creates an unconnected session.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inner: Mutex::new(Inner {
                state: SessionState::Unconnected,
                protocol_version: None,
                client_info: None,
                client_capabilities: None,
                acknowledged: false,
            }),
        }
    }

    /// Creates a session whose transport is already attached.
    #[must_use]
    pub fn connected(id: impl Into<String>) -> Self {
        let session = Self::new(id);
        session.connect();
        session
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Session identifier (transport-assigned).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Negotiated protocol version, once initialized.
    #[must_use]
    pub fn protocol_version(&self) -> Option<&'static str> {
        self.lock().protocol_version
    }

    /// `clientInfo` as sent in `initialize`.
    #[must_use]
    pub fn client_info(&self) -> Option<Value> {
        self.lock().client_info.clone()
    }

    /// Client capabilities as sent in `initialize`.
    #[must_use]
    pub fn client_capabilities(&self) -> Option<Value> {
        self.lock().client_capabilities.clone()
    }

    /// Whether the client has sent `notifications/initialized`.
    #[must_use]
    pub fn acknowledged(&self) -> bool {
        self.lock().acknowledged
    }

    /// `Unconnected → Initializing`. No-op in any other state.
    pub fn connect(&self) {
        let mut inner = self.lock();
        if inner.state == SessionState::Unconnected {
            inner.state = SessionState::Initializing;
        }
    }

    /// Handles the version part of `initialize`.
    ///
    /// On success the session is `Ready`. A failed negotiation closes it.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidRequest`] outside `Initializing` and
    /// [`ProtocolError::NegotiationFailed`] if no version is shared.
    pub fn initialize(
        &self,
        requested: &str,
        client_info: Option<Value>,
        client_capabilities: Option<Value>,
    ) -> Result<&'static str, ProtocolError> {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Initializing => {}
            SessionState::Ready => {
                return Err(ProtocolError::InvalidRequest("Session already initialized".into()));
            }
            state => {
                return Err(ProtocolError::InvalidRequest(format!("Session is {state}")));
            }
        }

        match negotiate_version(requested) {
            Ok(version) => {
                inner.state = SessionState::Ready;
                inner.protocol_version = Some(version);
                inner.client_info = client_info;
                inner.client_capabilities = client_capabilities;
                Ok(version)
            }
            Err(e) => {
                inner.state = SessionState::Closed;
                Err(e)
            }
        }
    }

    /// Records `notifications/initialized`. Returns `false` if not `Ready`.
    pub fn acknowledge(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == SessionState::Ready {
            inner.acknowledged = true;
            true
        } else {
            false
        }
    }

    /// Fails unless the session is `Ready`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidRequest`] naming the current state.
    pub fn require_ready(&self) -> Result<(), ProtocolError> {
        match self.state() {
            SessionState::Ready => Ok(()),
            SessionState::Closed => Err(ProtocolError::InvalidRequest("Session is closed".into())),
            _ => Err(ProtocolError::InvalidRequest("Server not initialized".into())),
        }
    }

    /// Moves to `Closed`. Returns `true` if the session was open.
    pub fn close(&self) -> bool {
        let mut inner = self.lock();
        let was_open = inner.state != SessionState::Closed;
        inner.state = SessionState::Closed;
        was_open
    }
}
