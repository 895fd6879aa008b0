//! Parameter schemas and argument validation.
//!
//! A schema is an ordered list of [`ParamSpec`]. Validation walks it in
//! declaration order and stops at the first missing required parameter or the
//! first type mismatch. Values are never coerced: `"2"` is not a number, and
//! `2.0` is not an integer. Arguments the schema does not declare are rejected.

use serde_json::{json, Map, Value};

use super::Arguments;
use crate::error::InvocationError;

/// Declared type of a parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    /// JSON string.
    String,
    /// Any JSON number.
    Number,
    /// JSON number with an integral representation.
    Integer,
    /// JSON boolean.
    Boolean,
    /// JSON array, optionally with a declared item type.
    Array(Option<Box<ParamType>>),
    /// JSON object.
    Object,
}

impl ParamType {
    /// Array whose items must all be of `item`.
    #[must_use]
    pub fn array_of(item: Self) -> Self {
        Self::Array(Some(Box::new(item)))
    }

    /// JSON-schema type name.
    #[must_use]
    pub const fn json_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array(_) => "array",
            Self::Object => "object",
        }
    }

    /// Checks `value` against this type. `path` names the value in the message.
    ///
    /// # Errors
    ///
    /// Returns a message describing the first mismatch.
    pub fn check(&self, value: &Value, path: &str) -> Result<(), String> {
        let ok = match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array(item) => {
                let Some(items) = value.as_array() else {
                    return Err(mismatch(path, self, value));
                };
                if let Some(item) = item {
                    for (i, v) in items.iter().enumerate() {
                        item.check(v, &format!("{path}[{i}]"))?;
                    }
                }
                true
            }
        };
        if ok {
            Ok(())
        } else {
            Err(mismatch(path, self, value))
        }
    }

    fn to_schema(&self) -> Value {
        match self {
            Self::Array(Some(item)) => json!({ "type": "array", "items": item.to_schema() }),
            other => json!({ "type": other.json_name() }),
        }
    }
}

fn json_type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn mismatch(path: &str, expected: &ParamType, got: &Value) -> String {
    format!(
        "Invalid type for parameter '{path}': expected {}, got {}",
        expected.json_name(),
        json_type_of(got)
    )
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    /// Parameter name.
    pub name: String,
    /// Declared type.
    pub ty: ParamType,
    /// Whether the caller must supply it.
    pub required: bool,
    /// Value used when an optional parameter is absent.
    pub default: Option<Value>,
    /// Human-readable description.
    pub description: Option<String>,
}

impl ParamSpec {
    /// A required parameter.
    #[must_use]
    pub fn required(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            default: None,
            description: None,
        }
    }

    /// An optional parameter.
    #[must_use]
    pub fn optional(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(name, ty)
        }
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Validates `supplied` against `params` and fills in defaults.
///
/// `None` and JSON `null` are treated as an empty argument object; a `null`
/// argument value is treated as absent.
///
/// # Errors
///
/// Returns [`InvocationError::InvalidParams`] naming the first missing
/// required parameter, the first type mismatch, or the first undeclared
/// parameter, in that order of precedence within declaration order.
pub fn validate(params: &[ParamSpec], supplied: Option<&Value>) -> Result<Arguments, InvocationError> {
    let empty = Map::new();
    let supplied = match supplied {
        None | Some(Value::Null) => &empty,
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(InvocationError::InvalidParams(format!(
                "arguments must be an object, got {}",
                json_type_of(other)
            )))
        }
    };

    let mut validated = Map::new();
    for param in params {
        match supplied.get(&param.name).filter(|v| !v.is_null()) {
            Some(value) => {
                param
                    .ty
                    .check(value, &param.name)
                    .map_err(InvocationError::InvalidParams)?;
                validated.insert(param.name.clone(), value.clone());
            }
            None if param.required => {
                return Err(InvocationError::InvalidParams(format!(
                    "Missing required parameter: {}",
                    param.name
                )));
            }
            None => {
                if let Some(default) = &param.default {
                    validated.insert(param.name.clone(), default.clone());
                }
            }
        }
    }

    if let Some(unknown) = supplied
        .keys()
        .find(|k| !params.iter().any(|p| &p.name == *k))
    {
        return Err(InvocationError::InvalidParams(format!(
            "Unknown parameter: {unknown}"
        )));
    }

    Ok(Arguments::new(validated))
}

/// Renders `params` as a JSON-schema object (`inputSchema` of a tool).
#[must_use]
pub fn input_schema(params: &[ParamSpec]) -> Value {
    let mut properties = Map::new();
    for p in params {
        let mut prop = p.ty.to_schema();
        if let Some(obj) = prop.as_object_mut() {
            if let Some(d) = &p.description {
                obj.insert("description".into(), json!(d));
            }
            if let Some(d) = &p.default {
                obj.insert("default".into(), d.clone());
            }
        }
        properties.insert(p.name.clone(), prop);
    }
    let required: Vec<&str> = params
        .iter()
        .filter(|p| p.required)
        .map(|p| p.name.as_str())
        .collect();

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Renders `params` as a prompt argument list.
#[must_use]
pub fn argument_list(params: &[ParamSpec]) -> Value {
    Value::Array(
        params
            .iter()
            .map(|p| {
                let mut arg = Map::new();
                arg.insert("name".into(), json!(p.name));
                if let Some(d) = &p.description {
                    arg.insert("description".into(), json!(d));
                }
                arg.insert("required".into(), json!(p.required));
                Value::Object(arg)
            })
            .collect(),
    )
}
