//! JSON-RPC 2.0 envelopes as spoken by MCP.
//!
//! Incoming lines become an [`IncomingMessage`]; everything sent back is a
//! [`JsonRpcReply`] or an [`OutgoingNotification`]. Batches are not part of
//! MCP and are rejected as invalid requests.
//!
//! An `id` is an integer or a string. It is echoed back untouched, and it is
//! recovered from malformed requests whenever it can be read so the client
//! can still correlate the error.
//!
//! # Error Codes
//!
//! | Condition                           | Code     |
//! |-------------------------------------|----------|
//! | Malformed JSON                      | `-32700` |
//! | Not a request / wrong session state | `-32600` |
//! | Unknown method or capability        | `-32601` |
//! | Bad arguments / no common version   | `-32602` |
//! | Handler panic, encoding failure     | `-32603` |
//! | Resource or prompt handler failure  | `-32000` |
//! | Invocation timeout                  | `-32001` |

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::capability::CapabilityKind;
use crate::error::{InvocationError, ProtocolError};

/// Protocol versions this implementation speaks, oldest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2024-11-05", "2025-03-26", "2025-06-18"];

/// The newest protocol version this implementation supports.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

const JSONRPC_VERSION: &str = "2.0";

/// Client-chosen request identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id.
    Number(i64),
    /// Any other JSON number (fractional, or beyond `i64`), echoed as received.
    OtherNumber(serde_json::Number),
    /// String id.
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => fmt::Display::fmt(n, f),
            Self::OtherNumber(n) => fmt::Display::fmt(n, f),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// A call that must be answered.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol marker, `"2.0"` once parsed.
    pub jsonrpc: String,
    /// Correlation id.
    pub id: RequestId,
    /// Method name, e.g. `tools/call`.
    pub method: String,
    /// Positional or named parameters.
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Builds a request. Mostly useful for tests and in-process clients.
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    fn problem(&self) -> Option<&'static str> {
        if self.method.is_empty() {
            Some("method must be a non-empty string")
        } else if matches!(&self.params, Some(p) if !(p.is_object() || p.is_array())) {
            Some("params must be an object or an array")
        } else {
            None
        }
    }
}

/// A one-way message from the client.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol marker.
    pub jsonrpc: String,
    /// Notification name, e.g. `notifications/initialized`.
    pub method: String,
    /// Parameters, if any.
    #[serde(default)]
    pub params: Option<Value>,
}

/// A one-way message from the server.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingNotification {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Notification name.
    pub method: String,
    /// Parameters, omitted when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl OutgoingNotification {
    /// `notifications/<kind>s/list_changed`.
    #[must_use]
    pub fn list_changed(kind: CapabilityKind) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: format!("notifications/{}/list_changed", kind.plural()),
            params: None,
        }
    }
}

/// Reply carrying a result.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Id of the request being answered.
    pub id: RequestId,
    /// Method-specific payload.
    pub result: Value,
}

impl JsonRpcResponse {
    /// Wraps `result` as the answer to request `id`.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Value is not const-compatible
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
        }
    }
}

/// Error codes this server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Body was not JSON.
    ParseError,
    /// Not a valid request, or not allowed in the session's state.
    InvalidRequest,
    /// No such method or capability.
    MethodNotFound,
    /// Arguments rejected.
    InvalidParams,
    /// Failure inside the server; detail is logged, not returned.
    InternalError,
    /// A capability did not finish within its time budget.
    Timeout,
    /// Server-defined failure (resource or prompt handler, rejected reload).
    ServerError,
}

impl ErrorCode {
    /// Wire value.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::Timeout => -32001,
            Self::ServerError => -32000,
        }
    }

    const fn message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::Timeout => "Request timed out",
            Self::ServerError => "Server error",
        }
    }
}

/// The `error` member of an error reply.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcErrorData {
    /// Numeric code, see [`ErrorCode`].
    pub code: i32,
    /// Human-readable summary.
    pub message: String,
    /// Structured detail for the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorData {
    /// Error with the code's standard message.
    #[must_use]
    pub fn from_code(code: ErrorCode) -> Self {
        Self::with_message(code, code.message())
    }

    /// Error with a specific message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Attaches `data`.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<ProtocolError> for JsonRpcErrorData {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::InvalidRequest(msg) => Self::with_message(ErrorCode::InvalidRequest, msg),
            ProtocolError::MethodNotFound(method) => {
                Self::with_message(ErrorCode::MethodNotFound, format!("Method not found: {method}"))
            }
            ProtocolError::InvalidParams(msg) => Self::with_message(ErrorCode::InvalidParams, msg),
            ProtocolError::NegotiationFailed {
                requested,
                supported,
            } => Self::with_message(ErrorCode::InvalidParams, "Unsupported protocol version")
                .with_data(json!({ "supported": supported, "requested": requested })),
        }
    }
}

impl From<InvocationError> for JsonRpcErrorData {
    /// Internal detail never reaches the client; log it before converting.
    fn from(error: InvocationError) -> Self {
        match error {
            InvocationError::NotFound { kind, name } => {
                let noun = match kind {
                    CapabilityKind::Resource => "Resource",
                    CapabilityKind::Tool => "Tool",
                    CapabilityKind::Prompt => "Prompt",
                };
                Self::with_message(ErrorCode::MethodNotFound, format!("{noun} not found: {name}"))
                    .with_data(json!({ "kind": kind, "name": name }))
            }
            InvocationError::InvalidParams(msg) => Self::with_message(ErrorCode::InvalidParams, msg),
            InvocationError::Timeout { name, after } => {
                let millis = u64::try_from(after.as_millis()).unwrap_or(u64::MAX);
                Self::with_message(ErrorCode::Timeout, format!("'{name}' timed out after {millis}ms"))
                    .with_data(json!({ "name": name, "timeoutMs": millis }))
            }
            InvocationError::HandlerFailure(msg) => Self::with_message(ErrorCode::ServerError, msg),
            InvocationError::Internal(_) => Self::from_code(ErrorCode::InternalError),
        }
    }
}

/// Reply carrying an error. `id` serialises as `null` when unknown.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Id of the offending request, if it could be read.
    pub id: Option<RequestId>,
    /// What went wrong.
    pub error: JsonRpcErrorData,
}

impl JsonRpcError {
    /// Pairs `error` with the request id.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // JsonRpcErrorData contains String
    pub fn new(id: Option<RequestId>, error: JsonRpcErrorData) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            error,
        }
    }

    /// `-32700` with a `null` id.
    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(None, JsonRpcErrorData::from_code(ErrorCode::ParseError))
    }

    /// `-32600` with the standard message.
    #[must_use]
    pub fn invalid_request(id: Option<RequestId>) -> Self {
        Self::new(id, JsonRpcErrorData::from_code(ErrorCode::InvalidRequest))
    }

    /// `-32601` naming `method`.
    #[must_use]
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self::new(Some(id), ProtocolError::MethodNotFound(method.to_string()).into())
    }
}

/// Either kind of response envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JsonRpcReply {
    /// A success response.
    Success(JsonRpcResponse),
    /// An error response.
    Error(JsonRpcError),
}

impl JsonRpcReply {
    /// The request ID the reply is correlated with.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Success(r) => Some(&r.id),
            Self::Error(e) => e.id.as_ref(),
        }
    }

    /// The error object, if this is an error reply.
    #[must_use]
    pub const fn error(&self) -> Option<&JsonRpcErrorData> {
        match self {
            Self::Success(_) => None,
            Self::Error(e) => Some(&e.error),
        }
    }

    /// The result value, if this is a success reply.
    #[must_use]
    pub const fn result(&self) -> Option<&Value> {
        match self {
            Self::Success(r) => Some(&r.result),
            Self::Error(_) => None,
        }
    }
}

impl From<JsonRpcResponse> for JsonRpcReply {
    fn from(response: JsonRpcResponse) -> Self {
        Self::Success(response)
    }
}

impl From<JsonRpcError> for JsonRpcReply {
    fn from(error: JsonRpcError) -> Self {
        Self::Error(error)
    }
}

/// A decoded client message.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// Has an `id`; gets exactly one reply.
    Request(JsonRpcRequest),
    /// No `id`; never answered.
    Notification(JsonRpcNotification),
}

impl IncomingMessage {
    /// The request id, for requests.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Notification(_) => None,
        }
    }
}

/// Decodes one line of text.
///
/// # Errors
///
/// `-32700` for text that is not JSON, otherwise as [`parse_value`].
pub fn parse_message(text: &str) -> Result<IncomingMessage, JsonRpcError> {
    serde_json::from_str(text)
        .map_err(|_| JsonRpcError::parse_error())
        .and_then(parse_value)
}

/// Classifies an already-decoded JSON value.
///
/// # Errors
///
/// `-32600` for anything other than a single well-formed request or
/// notification, carrying the id when one was readable.
pub fn parse_value(value: Value) -> Result<IncomingMessage, JsonRpcError> {
    let Value::Object(obj) = value else {
        return Err(JsonRpcError::invalid_request(None));
    };

    let id = readable_id(&obj);
    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(JsonRpcError::new(
            id,
            JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, "jsonrpc must be \"2.0\""),
        ));
    }

    if !obj.contains_key("id") {
        return serde_json::from_value(Value::Object(obj))
            .map(IncomingMessage::Notification)
            .map_err(|_| JsonRpcError::invalid_request(None));
    }

    let request: JsonRpcRequest =
        serde_json::from_value(Value::Object(obj)).map_err(|_| JsonRpcError::invalid_request(id))?;
    match request.problem() {
        Some(reason) => Err(JsonRpcError::new(
            Some(request.id),
            JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, reason),
        )),
        None => Ok(IncomingMessage::Request(request)),
    }
}

fn readable_id(obj: &Map<String, Value>) -> Option<RequestId> {
    match obj.get("id")? {
        Value::String(s) => Some(RequestId::String(s.clone())),
        Value::Number(n) => Some(n.as_i64().map_or_else(|| RequestId::OtherNumber(n.clone()), RequestId::Number)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn rejection(text: &str) -> JsonRpcError {
        match parse_message(text) {
            Ok(msg) => panic!("accepted {text}: {msg:?}"),
            Err(e) => e,
        }
    }

    #[test]
    fn requests_and_notifications_are_told_apart() {
        let msg = parse_message(r#"{"jsonrpc":"2.0","id":"abc-123","method":"tools/list","params":{}}"#).unwrap();
        assert_eq!(msg.id(), Some(&RequestId::String("abc-123".into())));
        assert!(matches!(msg, IncomingMessage::Request(ref r) if r.method == "tools/list"));

        let msg = parse_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(msg.id().is_none());
        assert!(matches!(msg, IncomingMessage::Notification(ref n) if n.method == "notifications/initialized"));
    }

    #[test]
    fn garbage_is_a_parse_error_with_null_id() {
        let err = rejection("{ definitely not json");
        assert_eq!(err.error.code, -32700);

        let wire = serde_json::to_value(&err).unwrap();
        assert_eq!(wire["id"], Value::Null);
    }

    #[test]
    fn malformed_envelopes_are_invalid_requests() {
        let cases = [
            (r#"[{"jsonrpc":"2.0","id":1,"method":"ping"}]"#, None),
            (r#"{"id":7,"method":"ping"}"#, Some(RequestId::Number(7))),
            (r#"{"jsonrpc":"1.0","id":"x","method":"ping"}"#, Some(RequestId::String("x".into()))),
            (r#"{"jsonrpc":"2.0","id":2,"method":"ping","params":3}"#, Some(RequestId::Number(2))),
            (r#"{"jsonrpc":"2.0","id":3,"method":""}"#, Some(RequestId::Number(3))),
            (r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#, None),
        ];
        for (text, id) in cases {
            let err = rejection(text);
            assert_eq!(err.error.code, -32600, "{text}");
            assert_eq!(err.id, id, "{text}");
        }
    }

    #[test]
    fn replies_serialise_with_version_and_id() {
        let ok: JsonRpcReply = JsonRpcResponse::success(RequestId::Number(1), json!({"ok": true})).into();
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}})
        );

        let err: JsonRpcReply = JsonRpcError::method_not_found(RequestId::String("q".into()), "nope/nope").into();
        let wire = serde_json::to_value(&err).unwrap();
        assert_eq!(wire["id"], "q");
        assert_eq!(wire["error"]["code"], -32601);
        assert!(wire["error"].get("data").is_none());
    }

    #[test]
    fn invocation_errors_map_to_codes() {
        let not_found: JsonRpcErrorData = InvocationError::NotFound {
            kind: CapabilityKind::Tool,
            name: "nonexistent".into(),
        }
        .into();
        assert_eq!(not_found.code, -32601);
        assert_eq!(not_found.data.unwrap()["kind"], "tool");

        let timeout: JsonRpcErrorData = InvocationError::Timeout {
            name: "slow".into(),
            after: Duration::from_millis(250),
        }
        .into();
        assert_eq!(timeout.code, -32001);
        assert_eq!(timeout.data.unwrap()["timeoutMs"], 250);

        let internal: JsonRpcErrorData = InvocationError::Internal("stack trace here".into()).into();
        assert_eq!(internal.code, -32603);
        assert_eq!(internal.message, "Internal error");

        let failed: JsonRpcErrorData = InvocationError::HandlerFailure("disk full".into()).into();
        assert_eq!(failed.code, -32000);
        assert_eq!(failed.message, "disk full");
    }

    #[test]
    fn negotiation_failure_lists_versions() {
        let data: JsonRpcErrorData = ProtocolError::NegotiationFailed {
            requested: "2023-01-01".into(),
            supported: SUPPORTED_PROTOCOL_VERSIONS.to_vec(),
        }
        .into();
        assert_eq!(data.code, -32602);
        let extra = data.data.unwrap();
        assert_eq!(extra["requested"], "2023-01-01");
        assert_eq!(extra["supported"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn list_changed_method_names() {
        let methods: Vec<String> = CapabilityKind::ALL
            .into_iter()
            .map(|kind| OutgoingNotification::list_changed(kind).method)
            .collect();
        assert_eq!(
            methods,
            [
                "notifications/resources/list_changed",
                "notifications/tools/list_changed",
                "notifications/prompts/list_changed",
            ]
        );
    }

    #[test]
    fn request_ids_display_bare() {
        assert_eq!(RequestId::Number(-4).to_string(), "-4");
        assert_eq!(RequestId::String("a b".into()).to_string(), "a b");
    }

    #[test]
    fn non_integer_ids_are_echoed_exactly() {
        for raw in ["1.5", "18446744073709551615"] {
            let text = format!(r#"{{"jsonrpc":"2.0","id":{raw},"method":"ping"}}"#);
            let msg = parse_message(&text).unwrap();
            let Some(id) = msg.id().cloned() else {
                panic!("{raw} parsed as a notification");
            };
            assert!(matches!(id, RequestId::OtherNumber(_)), "{raw}");

            let reply: JsonRpcReply = JsonRpcResponse::success(id, json!({})).into();
            let wire = serde_json::to_string(&reply).unwrap();
            assert!(wire.contains(&format!(r#""id":{raw}"#)), "{wire}");
        }

        let err = rejection(r#"{"jsonrpc":"1.0","id":2.5,"method":"ping"}"#);
        assert_eq!(serde_json::to_value(&err).unwrap()["id"], json!(2.5));
    }
}
