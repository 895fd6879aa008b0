//! Resource URI templates.
//!
//! A template is a URI with `{variable}` placeholders, e.g. `file://read/{path}`.
//! A variable at the very end of the template matches the rest of the URI,
//! slashes included. Any other variable matches a single path segment.

use regex::Regex;
use serde_json::{Map, Value};

/// A parsed resource URI template.
#[derive(Debug, Clone)]
pub struct UriTemplate {
    template: String,
    variables: Vec<String>,
    pattern: Regex,
}

impl PartialEq for UriTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.template == other.template
    }
}

impl UriTemplate {
    /// Parses a template.
    ///
    /// # Errors
    ///
    /// Returns a message for unbalanced braces, empty or invalid variable names,
    /// or a variable used twice.
    pub fn parse(template: &str) -> Result<Self, String> {
        let mut pattern = String::from("^");
        let mut variables: Vec<String> = Vec::new();
        let mut rest = template;

        while let Some(open) = rest.find(['{', '}']) {
            if rest[open..].starts_with('}') {
                return Err(format!("unbalanced '}}' in URI template '{template}'"));
            }
            pattern.push_str(&regex::escape(&rest[..open]));
            let after = &rest[open + 1..];
            let close = after
                .find('}')
                .ok_or_else(|| format!("unclosed '{{' in URI template '{template}'"))?;
            let name = &after[..close];
            let valid = name
                .chars()
                .enumerate()
                .all(|(i, c)| c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()));
            if name.is_empty() || !valid {
                return Err(format!("invalid variable '{name}' in URI template '{template}'"));
            }
            if variables.iter().any(|v| v == name) {
                return Err(format!("variable '{name}' repeated in URI template '{template}'"));
            }

            rest = &after[close + 1..];
            let class = if rest.is_empty() { ".+" } else { "[^/]+" };
            pattern.push_str(&format!("(?P<{name}>{class})"));
            variables.push(name.to_string());
        }
        pattern.push_str(&regex::escape(rest));
        pattern.push('$');

        let pattern = Regex::new(&pattern).map_err(|e| format!("URI template '{template}': {e}"))?;
        Ok(Self {
            template: template.to_string(),
            variables,
            pattern,
        })
    }

    /// The template text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Variable names in order of appearance.
    #[must_use]
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Returns `true` if the template has no variables.
    #[must_use]
    pub fn is_concrete(&self) -> bool {
        self.variables.is_empty()
    }

    /// Matches `uri` and returns the extracted variables as string arguments.
    #[must_use]
    pub fn matches(&self, uri: &str) -> Option<Map<String, Value>> {
        let captures = self.pattern.captures(uri)?;
        let mut out = Map::new();
        for name in &self.variables {
            let value = captures.name(name)?.as_str();
            out.insert(name.clone(), Value::String(value.to_string()));
        }
        Some(out)
    }
}
