//! The protocol dispatcher.
//!
//! Maps JSON-RPC requests onto the capability registry. The dispatcher is
//! transport-agnostic and shared by every session: the stdio server and the
//! HTTP transport both hand it a [`Session`] plus a parsed message.
//!
//! # Invocation
//!
//! `tools/call`, `resources/read` and `prompts/get` follow the same steps:
//!
//! 1. Take the live snapshot once; the whole request uses it.
//! 2. Look the capability up (`-32601` if absent).
//! 3. Validate arguments against its parameter schema (`-32602`). The handler
//!    is never called with invalid arguments.
//! 4. Run the handler on its own task under a timeout. A panic is caught at
//!    the task boundary and reported as `-32603`; a timeout aborts the task.
//!
//! A tool whose handler reports a failure still produces a successful
//! response, flagged with `isError: true`.

use std::any::Any;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::capability::{schema, Arguments, CapabilityKind, InvocationResult, Output, PromptMessage};
use crate::config::{ConfigStore, ServerConfig};
use crate::error::{ConfigError, InvocationError, ProtocolError};
use crate::mcp::metrics::Metrics;
use crate::mcp::protocol::{
    ErrorCode, IncomingMessage, JsonRpcError, JsonRpcErrorData, JsonRpcNotification, JsonRpcReply,
    JsonRpcRequest, JsonRpcResponse,
};
use crate::mcp::session::Session;
use crate::registry::{CapabilityRegistry, RegisteredCapability, RegistrySnapshot};

/// Identity and limits the dispatcher reports and applies.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// `serverInfo.name`.
    pub server_name: String,
    /// `serverInfo.version`.
    pub server_version: String,
    /// `instructions` in the initialize result.
    pub instructions: Option<String>,
    /// Page size for list results. `None` returns everything at once.
    pub page_size: Option<usize>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for DispatcherSettings {
    fn from(server: &ServerConfig) -> Self {
        Self {
            server_name: server.name.clone(),
            server_version: server.version.clone(),
            instructions: server.instructions.clone(),
            page_size: server.page_size.filter(|&n| n > 0),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
    protocol_version: String,
    #[serde(default)]
    capabilities: Option<Value>,
    #[serde(default)]
    client_info: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    #[serde(default)]
    cursor: Option<String>,
    /// Narrows `tools/list` to one category.
    #[serde(default)]
    category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestMeta {
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
    #[serde(default, rename = "_meta")]
    meta: Option<RequestMeta>,
}

#[derive(Debug, Deserialize)]
struct ReadParams {
    uri: String,
    #[serde(default, rename = "_meta")]
    meta: Option<RequestMeta>,
}

/// Routes JSON-RPC messages to the registry.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    store: Option<Arc<ConfigStore>>,
    settings: RwLock<Arc<DispatcherSettings>>,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    /// Creates a dispatcher over `registry`.
    #[must_use]
    pub fn new(registry: Arc<CapabilityRegistry>, settings: DispatcherSettings) -> Self {
        Self {
            registry,
            store: None,
            settings: RwLock::new(Arc::new(settings)),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Enables `admin/reload` backed by `store`.
    #[must_use]
    pub fn with_config_store(mut self, store: Arc<ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Shares `metrics` with the transports.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The registry this dispatcher reads from.
    #[must_use]
    pub const fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Shared counters.
    #[must_use]
    pub const fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Identity and limits in use. Replaced by every successful reload.
    #[must_use]
    pub fn settings(&self) -> Arc<DispatcherSettings> {
        Arc::clone(&self.settings.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Handles any incoming message. Notifications produce no reply.
    pub async fn handle_message(&self, session: &Session, message: IncomingMessage) -> Option<JsonRpcReply> {
        match message {
            IncomingMessage::Request(req) => Some(self.handle_request(session, req).await),
            IncomingMessage::Notification(notif) => {
                self.handle_notification(session, &notif);
                None
            }
        }
    }

    /// Handles a request and builds its reply. The request ID is echoed verbatim.
    pub async fn handle_request(&self, session: &Session, req: JsonRpcRequest) -> JsonRpcReply {
        self.metrics.record_request();
        tracing::debug!(method = %req.method, id = %req.id, session = session.id(), "Handling request");

        let outcome = if req.method == "initialize" {
            self.initialize(session, req.params).map_err(JsonRpcErrorData::from)
        } else {
            match session.require_ready() {
                Ok(()) => self.dispatch(&req.method, req.params).await,
                Err(e) => Err(e.into()),
            }
        };

        match outcome {
            Ok(result) => JsonRpcResponse::success(req.id, result).into(),
            Err(error) => {
                self.metrics.record_error();
                tracing::debug!(method = %req.method, id = %req.id, code = error.code, "Request failed");
                JsonRpcError::new(Some(req.id), error).into()
            }
        }
    }

    /// Handles a notification.
    pub fn handle_notification(&self, session: &Session, notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            "notifications/initialized" => {
                if session.acknowledge() {
                    tracing::info!(session = session.id(), "Client initialized");
                } else {
                    tracing::debug!(session = session.id(), state = %session.state(), "Ignoring early initialized notification");
                }
            }
            method => tracing::debug!(method, session = session.id(), "Ignoring notification"),
        }
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, JsonRpcErrorData> {
        match method {
            "ping" => Ok(json!({})),
            "tools/list" => self.list(CapabilityKind::Tool, params),
            "resources/list" => self.list(CapabilityKind::Resource, params),
            "resources/templates/list" => self.list_templates(params),
            "prompts/list" => self.list(CapabilityKind::Prompt, params),
            "tools/call" => self.call_tool(params).await,
            "resources/read" => self.read_resource(params).await,
            "prompts/get" => self.get_prompt(params).await,
            "admin/reload" => self.reload_result().await,
            other => Err(ProtocolError::MethodNotFound(other.to_string()).into()),
        }
    }

    fn initialize(&self, session: &Session, params: Option<Value>) -> Result<Value, ProtocolError> {
        let params: InitializeParams = parse_params(params)?;

        let client = params
            .client_info
            .as_ref()
            .and_then(|c| c.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let version = match session.initialize(&params.protocol_version, params.client_info, params.capabilities) {
            Ok(version) => version,
            Err(e) => {
                tracing::warn!(session = session.id(), requested = %params.protocol_version, error = %e, "Initialize rejected");
                return Err(e);
            }
        };
        tracing::info!(session = session.id(), client = %client, protocol_version = version, "Session initialized");

        let settings = self.settings();
        let snapshot = self.registry.current();
        let mut capabilities = Map::new();
        for kind in CapabilityKind::ALL {
            if snapshot.len(kind) > 0 {
                capabilities.insert(kind.plural().to_string(), json!({ "listChanged": true }));
            }
        }

        let mut result = json!({
            "protocolVersion": version,
            "capabilities": capabilities,
            "serverInfo": {
                "name": settings.server_name,
                "version": settings.server_version,
            },
        });
        if let Some(instructions) = &settings.instructions {
            result["instructions"] = json!(instructions);
        }
        Ok(result)
    }

    fn list(&self, kind: CapabilityKind, params: Option<Value>) -> Result<Value, JsonRpcErrorData> {
        let params: ListParams = parse_params(params)?;
        let snapshot = self.registry.current();

        // Templates are listed separately.
        let category = params.category.as_deref();
        let page = snapshot
            .page_where(kind, params.cursor.as_deref(), self.settings().page_size, |c| {
                let listed = kind != CapabilityKind::Resource || c.descriptor.uri().is_some_and(|u| u.is_concrete());
                listed && category.map_or(true, |want| c.descriptor.category() == Some(want))
            })
            .map_err(JsonRpcErrorData::from)?;

        let items: Vec<Value> = page.items.iter().map(|c| c.descriptor.to_wire()).collect();
        let mut result = Map::new();
        result.insert(kind.plural().to_string(), Value::Array(items));
        if let Some(cursor) = page.next_cursor {
            result.insert("nextCursor".to_string(), json!(cursor));
        }
        Ok(Value::Object(result))
    }

    fn list_templates(&self, params: Option<Value>) -> Result<Value, JsonRpcErrorData> {
        let params: ListParams = parse_params(params)?;
        let snapshot = self.registry.current();

        let page = snapshot
            .page_where(
                CapabilityKind::Resource,
                params.cursor.as_deref(),
                self.settings().page_size,
                |c| c.descriptor.uri().is_some_and(|u| !u.is_concrete()),
            )
            .map_err(JsonRpcErrorData::from)?;

        let items: Vec<Value> = page.items.iter().map(|c| c.descriptor.to_wire()).collect();
        let mut result = json!({ "resourceTemplates": items });
        if let Some(cursor) = page.next_cursor {
            result["nextCursor"] = json!(cursor);
        }
        Ok(result)
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcErrorData> {
        self.metrics.record_tool_call();
        let params: CallParams = parse_params(params)?;
        let snapshot = self.registry.current();

        let capability = lookup(&snapshot, CapabilityKind::Tool, &params.name)?;
        let args = schema::validate(capability.descriptor.params(), params.arguments.as_ref())?;
        let timeout = effective_timeout(&capability, params.meta.as_ref())?;

        match self.invoke(&capability, args, timeout).await {
            Ok(output) => tool_result(output).map_err(|e| self.wire_error(e)),
            Err(InvocationError::HandlerFailure(message)) => Ok(json!({
                "content": [{ "type": "text", "text": message }],
                "isError": true,
            })),
            Err(e) => Err(self.wire_error(e)),
        }
    }

    async fn read_resource(&self, params: Option<Value>) -> Result<Value, JsonRpcErrorData> {
        let params: ReadParams = parse_params(params)?;
        let snapshot = self.registry.current();

        let (capability, variables) =
            snapshot
                .resolve_resource(&params.uri)
                .ok_or_else(|| InvocationError::NotFound {
                    kind: CapabilityKind::Resource,
                    name: params.uri.clone(),
                })?;
        let args = schema::validate(capability.descriptor.params(), Some(&Value::Object(variables)))?;
        let timeout = effective_timeout(&capability, params.meta.as_ref())?;

        let output = self
            .invoke(&capability, args, timeout)
            .await
            .map_err(|e| self.wire_error(e))?;

        let content = resource_content(&params.uri, capability.descriptor.mime_type(), output)
            .map_err(|e| self.wire_error(e))?;
        Ok(json!({ "contents": [content] }))
    }

    async fn get_prompt(&self, params: Option<Value>) -> Result<Value, JsonRpcErrorData> {
        let params: CallParams = parse_params(params)?;
        let snapshot = self.registry.current();

        let capability = lookup(&snapshot, CapabilityKind::Prompt, &params.name)?;
        let args = schema::validate(capability.descriptor.params(), params.arguments.as_ref())?;
        let timeout = effective_timeout(&capability, params.meta.as_ref())?;

        let output = self
            .invoke(&capability, args, timeout)
            .await
            .map_err(|e| self.wire_error(e))?;

        let (description, messages) = match output {
            Output::Prompt {
                description,
                messages,
            } => (description.or_else(|| Some(capability.descriptor.description().to_string())), messages),
            Output::Text(text) => (None, vec![PromptMessage::user(text)]),
            Output::Json(value) => (None, vec![PromptMessage::user(value.to_string())]),
            Output::Blob { .. } => {
                return Err(self.wire_error(InvocationError::Internal(format!(
                    "prompt '{}' produced binary output",
                    params.name
                ))));
            }
        };

        let messages: Vec<Value> = messages
            .into_iter()
            .map(|m| json!({ "role": m.role, "content": { "type": "text", "text": m.text } }))
            .collect();
        let mut result = json!({ "messages": messages });
        if let Some(description) = description.filter(|d| !d.is_empty()) {
            result["description"] = json!(description);
        }
        Ok(result)
    }

    /// Runs a handler on its own task under `timeout`.
    async fn invoke(
        &self,
        capability: &RegisteredCapability,
        args: Arguments,
        timeout: Duration,
    ) -> Result<Output, InvocationError> {
        let name = capability.descriptor.name().to_string();
        let kind = capability.descriptor.kind();
        let handler = capability.descriptor.handler();

        tracing::debug!(%kind, name = %name, provider = %capability.provider, ?timeout, "Invoking");
        let mut task = tokio::spawn(async move { handler.invoke(args).await });

        match tokio::time::timeout(timeout, &mut task).await {
            Err(_) => {
                task.abort();
                self.metrics.record_timeout();
                tracing::warn!(%kind, name = %name, ?timeout, "Invocation timed out");
                Err(InvocationError::Timeout { name, after: timeout })
            }
            Ok(Err(join_error)) => {
                if join_error.is_panic() {
                    self.metrics.record_panic();
                    let payload = join_error.into_panic();
                    let message = panic_message(payload.as_ref());
                    Err(InvocationError::Internal(format!("{kind} '{name}' panicked: {message}")))
                } else {
                    Err(InvocationError::Internal(format!("{kind} '{name}' was cancelled")))
                }
            }
            Ok(Ok(InvocationResult::Success(output))) => Ok(output),
            Ok(Ok(InvocationResult::Failure(message))) => {
                self.metrics.record_handler_failure();
                tracing::warn!(%kind, name = %name, error = %message, "Handler reported failure");
                Err(InvocationError::HandlerFailure(message))
            }
        }
    }

    /// Converts for the wire, logging internal detail that is about to be dropped.
    fn wire_error(&self, error: InvocationError) -> JsonRpcErrorData {
        if let InvocationError::Internal(detail) = &error {
            tracing::error!(error = %detail, "Internal error during invocation");
        }
        error.into()
    }

    /// Re-reads the configuration and publishes a new snapshot.
    ///
    /// Blocks on file I/O; async callers go through `spawn_blocking`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if no configuration store is
    /// attached, otherwise the reload error. The live snapshot is unchanged on
    /// error.
    pub fn reload(&self) -> Result<Arc<RegistrySnapshot>, ConfigError> {
        let store = self.store()?;
        let snapshot = store.reload_into(&self.registry)?;
        Ok(self.reloaded(store, snapshot))
    }

    async fn reload_off_runtime(&self) -> Result<Arc<RegistrySnapshot>, ConfigError> {
        let store = Arc::clone(self.store()?);
        let registry = Arc::clone(&self.registry);
        let worker = Arc::clone(&store);
        let snapshot = match tokio::task::spawn_blocking(move || worker.reload_into(&registry)).await {
            Ok(result) => result?,
            Err(e) => {
                return Err(ConfigError::ValidationError {
                    message: format!("reload task failed: {e}"),
                })
            }
        };
        Ok(self.reloaded(&store, snapshot))
    }

    fn store(&self) -> Result<&Arc<ConfigStore>, ConfigError> {
        self.store.as_ref().ok_or_else(|| ConfigError::ValidationError {
            message: "no configuration store attached".to_string(),
        })
    }

    /// Picks up the `server` section of the configuration just published.
    fn reloaded(&self, store: &ConfigStore, snapshot: Arc<RegistrySnapshot>) -> Arc<RegistrySnapshot> {
        let settings = DispatcherSettings::from(&store.config().server);
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(settings);
        self.metrics.record_reload();
        snapshot
    }

    async fn reload_result(&self) -> Result<Value, JsonRpcErrorData> {
        if self.store.is_none() {
            return Err(ProtocolError::MethodNotFound("admin/reload".to_string()).into());
        }
        match self.reload_off_runtime().await {
            Ok(snapshot) => Ok(json!({
                "version": snapshot.version(),
                "resources": snapshot.len(CapabilityKind::Resource),
                "tools": snapshot.len(CapabilityKind::Tool),
                "prompts": snapshot.len(CapabilityKind::Prompt),
            })),
            Err(e) => Err(JsonRpcErrorData::with_message(
                ErrorCode::ServerError,
                format!("Reload rejected: {e}"),
            )
            .with_data(json!({ "liveVersion": self.registry.current().version() }))),
        }
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, ProtocolError> {
    let value = match params {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(v) => v,
    };
    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidParams(format!("Invalid params: {e}")))
}

fn lookup(
    snapshot: &RegistrySnapshot,
    kind: CapabilityKind,
    name: &str,
) -> Result<Arc<RegisteredCapability>, InvocationError> {
    snapshot
        .get(kind, name)
        .cloned()
        .ok_or_else(|| InvocationError::NotFound {
            kind,
            name: name.to_string(),
        })
}

/// Caller's `_meta.timeoutMs`, else the configured budget.
fn effective_timeout(
    capability: &RegisteredCapability,
    meta: Option<&RequestMeta>,
) -> Result<Duration, InvocationError> {
    match meta.and_then(|m| m.timeout_ms) {
        Some(0) => Err(InvocationError::InvalidParams(
            "_meta.timeoutMs must be greater than zero".to_string(),
        )),
        Some(ms) => Ok(Duration::from_millis(ms)),
        None => Ok(capability.timeout),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn tool_result(output: Output) -> Result<Value, InvocationError> {
    let value = match output {
        Output::Text(text) => json!({
            "content": [{ "type": "text", "text": text }],
            "isError": false,
        }),
        Output::Json(value) => {
            let text = serde_json::to_string_pretty(&value)
                .map_err(|e| InvocationError::Internal(format!("failed to serialise tool result: {e}")))?;
            let mut result = json!({
                "content": [{ "type": "text", "text": text }],
                "isError": false,
            });
            if value.is_object() {
                result["structuredContent"] = value;
            }
            result
        }
        Output::Blob { data, mime_type } if mime_type.starts_with("image/") => json!({
            "content": [{ "type": "image", "data": BASE64_STANDARD.encode(data), "mimeType": mime_type }],
            "isError": false,
        }),
        Output::Blob { data, mime_type } => json!({
            "content": [{
                "type": "resource",
                "resource": { "uri": "blob:", "mimeType": mime_type, "blob": BASE64_STANDARD.encode(data) },
            }],
            "isError": false,
        }),
        Output::Prompt { messages, .. } => {
            let content: Vec<Value> = messages
                .into_iter()
                .map(|m| json!({ "type": "text", "text": m.text }))
                .collect();
            json!({ "content": content, "isError": false })
        }
    };
    Ok(value)
}

fn resource_content(uri: &str, mime_type: Option<&str>, output: Output) -> Result<Value, InvocationError> {
    let value = match output {
        Output::Text(text) => json!({
            "uri": uri,
            "mimeType": mime_type.unwrap_or("text/plain"),
            "text": text,
        }),
        Output::Json(value) => {
            let text = serde_json::to_string_pretty(&value)
                .map_err(|e| InvocationError::Internal(format!("failed to serialise resource: {e}")))?;
            json!({
                "uri": uri,
                "mimeType": mime_type.unwrap_or("application/json"),
                "text": text,
            })
        }
        Output::Blob { data, mime_type: blob_mime } => json!({
            "uri": uri,
            "mimeType": blob_mime,
            "blob": BASE64_STANDARD.encode(data),
        }),
        Output::Prompt { messages, .. } => {
            let text: Vec<String> = messages.into_iter().map(|m| m.text).collect();
            json!({
                "uri": uri,
                "mimeType": mime_type.unwrap_or("text/plain"),
                "text": text.join("\n\n"),
            })
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::capability::{handler_fn, CapabilityDescriptor, ParamSpec, ParamType};
    use crate::mcp::protocol::RequestId;
    use crate::provider::StaticProvider;
    use crate::registry::SnapshotBuilder;

    fn dispatcher_with(tools: Vec<CapabilityDescriptor>) -> Dispatcher {
        let provider = StaticProvider::new("test", tools);
        let mut builder = SnapshotBuilder::new(Duration::from_secs(5));
        builder.add_provider(&provider).unwrap();
        let registry = Arc::new(CapabilityRegistry::with_snapshot(builder.finish()));
        Dispatcher::new(registry, DispatcherSettings::default())
    }

    async fn ready_session(dispatcher: &Dispatcher) -> Session {
        let session = Session::connected("test");
        let reply = dispatcher
            .handle_request(
                &session,
                JsonRpcRequest::new(
                    RequestId::Number(0),
                    "initialize",
                    Some(json!({"protocolVersion": "2025-06-18"})),
                ),
            )
            .await;
        assert!(reply.error().is_none());
        session
    }

    async fn call(dispatcher: &Dispatcher, session: &Session, method: &str, params: Value) -> JsonRpcReply {
        dispatcher
            .handle_request(session, JsonRpcRequest::new(RequestId::Number(1), method, Some(params)))
            .await
    }

    #[tokio::test]
    async fn requests_before_initialize_are_invalid() {
        let dispatcher = dispatcher_with(vec![]);
        let session = Session::connected("early");
        let reply = call(&dispatcher, &session, "tools/list", json!({})).await;
        assert_eq!(reply.error().unwrap().code, -32600);

        let reply = call(&dispatcher, &session, "no/such/method", json!({})).await;
        assert_eq!(reply.error().unwrap().code, -32600);
    }

    #[tokio::test]
    async fn initialize_reports_only_populated_kinds() {
        let echo = CapabilityDescriptor::tool("echo", handler_fn(|_| async { InvocationResult::text("hi") }));
        let dispatcher = dispatcher_with(vec![echo]);
        let session = Session::connected("s");
        let reply = dispatcher
            .handle_request(
                &session,
                JsonRpcRequest::new(RequestId::String("init".into()), "initialize", Some(json!({"protocolVersion": "2025-04-01"}))),
            )
            .await;

        assert_eq!(reply.id(), Some(&RequestId::String("init".into())));
        let result = reply.result().unwrap();
        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(result["capabilities"]["tools"]["listChanged"], true);
        assert!(result["capabilities"].get("prompts").is_none());
        assert_eq!(result["serverInfo"]["name"], "MCP Learning Server");
    }

    #[tokio::test]
    async fn missing_protocol_version_is_invalid_params() {
        let dispatcher = dispatcher_with(vec![]);
        let session = Session::connected("s");
        let reply = call(&dispatcher, &session, "initialize", json!({})).await;
        assert_eq!(reply.error().unwrap().code, -32602);
        assert_eq!(session.state(), crate::mcp::session::SessionState::Initializing);
    }

    #[tokio::test]
    async fn handler_not_called_on_invalid_arguments() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let tool = CapabilityDescriptor::tool(
            "count",
            handler_fn(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { InvocationResult::text("ok") }
            }),
        )
        .with_param(ParamSpec::required("n", ParamType::Integer));

        let dispatcher = dispatcher_with(vec![tool]);
        let session = ready_session(&dispatcher).await;

        let reply = call(&dispatcher, &session, "tools/call", json!({"name": "count", "arguments": {"n": "x"}})).await;
        assert_eq!(reply.error().unwrap().code, -32602);
        let reply = call(&dispatcher, &session, "tools/call", json!({"name": "count", "arguments": {}})).await;
        assert_eq!(reply.error().unwrap().code, -32602);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let reply = call(&dispatcher, &session, "tools/call", json!({"name": "count", "arguments": {"n": 2}})).await;
        assert!(reply.error().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_failure_is_flagged_result() {
        let tool = CapabilityDescriptor::tool("broken", handler_fn(|_| async { InvocationResult::failure("Division by zero") }));
        let dispatcher = dispatcher_with(vec![tool]);
        let session = ready_session(&dispatcher).await;

        let reply = call(&dispatcher, &session, "tools/call", json!({"name": "broken"})).await;
        let result = reply.result().unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["text"], "Division by zero");
    }

    #[tokio::test]
    async fn caller_timeout_wins() {
        let tool = CapabilityDescriptor::tool(
            "slow",
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                InvocationResult::text("late")
            }),
        );
        let dispatcher = dispatcher_with(vec![tool]);
        let session = ready_session(&dispatcher).await;

        let reply = call(
            &dispatcher,
            &session,
            "tools/call",
            json!({"name": "slow", "_meta": {"timeoutMs": 20}}),
        )
        .await;
        let error = reply.error().unwrap();
        assert_eq!(error.code, -32001);
        assert_eq!(error.data.as_ref().unwrap()["timeoutMs"], 20);
        assert_eq!(dispatcher.metrics().snapshot(0).timeouts, 1);
    }

    #[tokio::test]
    async fn unknown_method_when_ready() {
        let dispatcher = dispatcher_with(vec![]);
        let session = ready_session(&dispatcher).await;
        let reply = call(&dispatcher, &session, "tools/explode", json!({})).await;
        assert_eq!(reply.error().unwrap().code, -32601);
    }

    #[tokio::test]
    async fn reload_without_store_is_method_not_found() {
        let dispatcher = dispatcher_with(vec![]);
        let session = ready_session(&dispatcher).await;
        let reply = call(&dispatcher, &session, "admin/reload", json!({})).await;
        assert_eq!(reply.error().unwrap().code, -32601);
    }

    #[test]
    fn panic_payloads_are_readable() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }

    #[test]
    fn json_output_carries_structured_content() {
        let result = tool_result(Output::Json(json!({"result": 4}))).unwrap();
        assert_eq!(result["structuredContent"]["result"], 4);
        assert_eq!(result["isError"], false);
        let text = result["content"][0]["text"].as_str().unwrap();
        assert_eq!(serde_json::from_str::<Value>(text).unwrap()["result"], 4);
    }
}
