//! Capability descriptors and the uniform handler interface.
//!
//! Every Resource, Tool and Prompt the server can serve is described by one
//! immutable [`CapabilityDescriptor`]: its kind, a name unique within that kind,
//! human-readable metadata, an ordered parameter schema and a [`Handler`].
//!
//! The dispatcher never branches on which provider supplied a descriptor. It
//! validates arguments against [`CapabilityDescriptor::params`] and calls
//! [`Handler::invoke`] with the validated [`Arguments`].

pub mod schema;
pub mod uri;

pub use schema::{ParamSpec, ParamType};
pub use uri::UriTemplate;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};

/// The three capability kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    /// Read-only data addressed by URI.
    Resource,
    /// An invocable action.
    Tool,
    /// A templated text generator.
    Prompt,
}

impl CapabilityKind {
    /// All kinds, in the order they are reported to clients.
    pub const ALL: [Self; 3] = [Self::Resource, Self::Tool, Self::Prompt];

    /// Plural form used in method names and list results (`tools/list` → `"tools"`).
    #[must_use]
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Resource => "resources",
            Self::Tool => "tools",
            Self::Prompt => "prompts",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Resource => "resource",
            Self::Tool => "tool",
            Self::Prompt => "prompt",
        };
        f.write_str(s)
    }
}

/// Validated arguments handed to a [`Handler`].
///
/// Every key has been checked against the descriptor's parameter schema and
/// absent optional parameters carry their declared default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(Map<String, Value>);

impl Arguments {
    /// Wraps an already validated argument map.
    #[must_use]
    pub const fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Returns the raw value of an argument.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Returns a string argument.
    #[must_use]
    pub fn str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// Returns a numeric argument as `f64`.
    #[must_use]
    pub fn f64(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(Value::as_f64)
    }

    /// Returns an integer argument.
    #[must_use]
    pub fn i64(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(Value::as_i64)
    }

    /// Returns a boolean argument.
    #[must_use]
    pub fn bool(&self, name: &str) -> Option<bool> {
        self.0.get(name).and_then(Value::as_bool)
    }

    /// Returns an array argument.
    #[must_use]
    pub fn array(&self, name: &str) -> Option<&Vec<Value>> {
        self.0.get(name).and_then(Value::as_array)
    }

    /// Returns a string argument or a failure message naming it.
    ///
    /// # Errors
    ///
    /// Returns a message if the argument is absent or not a string.
    pub fn require_str(&self, name: &str) -> Result<&str, String> {
        self.str(name)
            .ok_or_else(|| format!("Missing required parameter: {name}"))
    }

    /// Returns a numeric argument or a failure message naming it.
    ///
    /// # Errors
    ///
    /// Returns a message if the argument is absent or not a number.
    pub fn require_f64(&self, name: &str) -> Result<f64, String> {
        self.f64(name)
            .ok_or_else(|| format!("Missing required parameter: {name}"))
    }

    /// Number of arguments present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no arguments are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the wrapper and returns the underlying map.
    #[must_use]
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

/// One message produced by a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMessage {
    /// `"user"` or `"assistant"`.
    pub role: &'static str,
    /// Message text.
    pub text: String,
}

impl PromptMessage {
    /// A user-role message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user",
            text: text.into(),
        }
    }
}

/// Successful handler output.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Plain text.
    Text(String),
    /// Structured data. Tools expose it as `structuredContent` alongside a text rendering.
    Json(Value),
    /// Binary data, transported base64-encoded.
    Blob {
        /// Raw bytes.
        data: Vec<u8>,
        /// MIME type of the data.
        mime_type: String,
    },
    /// Prompt messages.
    Prompt {
        /// Optional description of the rendered prompt.
        description: Option<String>,
        /// The messages.
        messages: Vec<PromptMessage>,
    },
}

/// What a handler produced: a payload, or a failure detail of its own making.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationResult {
    /// The handler succeeded.
    Success(Output),
    /// The handler's own logic failed; the detail is safe to show the client.
    Failure(String),
}

impl InvocationResult {
    /// Successful text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Success(Output::Text(text.into()))
    }

    /// Successful structured result.
    #[must_use]
    pub const fn json(value: Value) -> Self {
        Self::Success(Output::Json(value))
    }

    /// Failed result.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(message.into())
    }

    /// Returns `true` if the handler succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl<E: fmt::Display> From<Result<Output, E>> for InvocationResult {
    fn from(result: Result<Output, E>) -> Self {
        match result {
            Ok(output) => Self::Success(output),
            Err(e) => Self::Failure(e.to_string()),
        }
    }
}

/// The uniform capability handler interface.
///
/// Handlers receive validated arguments only. They must not touch the registry.
/// Blocking work belongs in `tokio::task::spawn_blocking` or async I/O; the
/// dispatcher already runs each invocation on its own task under a timeout.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Runs the capability.
    async fn invoke(&self, args: Arguments) -> InvocationResult;
}

/// Adapts an async closure into a [`Handler`].
pub struct FnHandler<F>(F);

impl<F> FnHandler<F> {
    /// Wraps a closure.
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = InvocationResult> + Send,
{
    async fn invoke(&self, args: Arguments) -> InvocationResult {
        (self.0)(args).await
    }
}

/// Shorthand for an `Arc<dyn Handler>` built from a closure.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = InvocationResult> + Send + 'static,
{
    Arc::new(FnHandler::new(f))
}

/// Immutable metadata and handler for one capability.
#[derive(Clone)]
pub struct CapabilityDescriptor {
    kind: CapabilityKind,
    name: String,
    title: Option<String>,
    description: String,
    params: Vec<ParamSpec>,
    uri: Option<UriTemplate>,
    mime_type: Option<String>,
    category: Option<String>,
    handler: Arc<dyn Handler>,
}

impl fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("params", &self.params)
            .field("uri", &self.uri.as_ref().map(UriTemplate::as_str))
            .finish_non_exhaustive()
    }
}

impl CapabilityDescriptor {
    fn new(kind: CapabilityKind, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self {
            kind,
            name: name.into(),
            title: None,
            description: String::new(),
            params: Vec::new(),
            uri: None,
            mime_type: None,
            category: None,
            handler,
        }
    }

    /// Starts a tool descriptor.
    #[must_use]
    pub fn tool(name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self::new(CapabilityKind::Tool, name, handler)
    }

    /// Starts a prompt descriptor.
    #[must_use]
    pub fn prompt(name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self::new(CapabilityKind::Prompt, name, handler)
    }

    /// Starts a resource descriptor addressed by `uri`.
    ///
    /// Each `{variable}` in the URI becomes a required string parameter.
    ///
    /// # Errors
    ///
    /// Returns a message if the URI template is malformed.
    pub fn resource(
        name: impl Into<String>,
        uri: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<Self, String> {
        let template = UriTemplate::parse(uri)?;
        let mut descriptor = Self::new(CapabilityKind::Resource, name, handler);
        descriptor.params = template
            .variables()
            .iter()
            .map(|v| ParamSpec::required(v.clone(), ParamType::String))
            .collect();
        descriptor.uri = Some(template);
        Ok(descriptor)
    }

    /// Sets the display title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Appends a parameter to the schema.
    #[must_use]
    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// Sets the MIME type of a resource.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Groups the capability, e.g. `"calculator"`. Tools can be listed by category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Capability kind.
    #[must_use]
    pub const fn kind(&self) -> CapabilityKind {
        self.kind
    }

    /// Capability name, unique within its kind.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display title, if any.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Ordered parameter schema.
    #[must_use]
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// URI template of a resource.
    #[must_use]
    pub const fn uri(&self) -> Option<&UriTemplate> {
        self.uri.as_ref()
    }

    /// MIME type of a resource.
    #[must_use]
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// Category, if any.
    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// The handler.
    #[must_use]
    pub fn handler(&self) -> Arc<dyn Handler> {
        Arc::clone(&self.handler)
    }

    /// Returns a copy whose parameter defaults are replaced by `overrides`.
    ///
    /// The name, kind and handler are unchanged.
    ///
    /// # Errors
    ///
    /// Returns a message if an override names an undeclared parameter or has
    /// the wrong type.
    pub fn with_default_overrides(&self, overrides: &Map<String, Value>) -> Result<Self, String> {
        let mut copy = self.clone();
        for (key, value) in overrides {
            let param = copy
                .params
                .iter_mut()
                .find(|p| &p.name == key)
                .ok_or_else(|| format!("{} '{}' has no parameter '{key}'", self.kind, self.name))?;
            param.ty.check(value, key)?;
            param.default = Some(value.clone());
        }
        Ok(copy)
    }

    /// Renders the descriptor the way `*/list` results expose it.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("name".into(), json!(self.name));
        if let Some(title) = &self.title {
            obj.insert("title".into(), json!(title));
        }
        obj.insert("description".into(), json!(self.description));

        match self.kind {
            CapabilityKind::Tool => {
                obj.insert("inputSchema".into(), schema::input_schema(&self.params));
            }
            CapabilityKind::Resource => {
                if let Some(uri) = &self.uri {
                    let key = if uri.is_concrete() { "uri" } else { "uriTemplate" };
                    obj.insert(key.into(), json!(uri.as_str()));
                }
                if let Some(mime) = &self.mime_type {
                    obj.insert("mimeType".into(), json!(mime));
                }
            }
            CapabilityKind::Prompt => {
                obj.insert("arguments".into(), schema::argument_list(&self.params));
            }
        }
        if let Some(category) = &self.category {
            obj.insert("_meta".into(), json!({ "category": category }));
        }

        Value::Object(obj)
    }
}
