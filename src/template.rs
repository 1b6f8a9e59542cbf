// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! Stage text templating
//!
//! Stage descriptions may reference run inputs as `{name}`. Doubled braces
//! (`{{`, `}}`) render as literal braces. Anything that is not an identifier
//! between single braces, such as a JSON snippet, is left untouched.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use crate::pipeline::Inputs;

/// Errors raised while rendering stage text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template references unknown input '{{{name}}}'")]
    MissingVariable { name: String },

    #[error("input '{name}' is not a scalar value and cannot be interpolated")]
    NonScalar { name: String },
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_\-]*)\}").expect("valid template regex")
    })
}

/// Render `{name}` references using scalar input values.
///
/// An empty input mapping disables interpolation entirely and the text is
/// returned as written.
pub fn render(template: &str, inputs: &Inputs) -> Result<String, TemplateError> {
    if inputs.is_empty() {
        return Ok(template.to_string());
    }

    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in token_pattern().captures_iter(template) {
        let whole = caps.get(0).expect("capture 0 always present");
        out.push_str(&template[last..whole.start()]);
        last = whole.end();

        match whole.as_str() {
            "{{" => out.push('{'),
            "}}" => out.push('}'),
            _ => {
                let name = &caps[1];
                let value = inputs.get(name).ok_or_else(|| TemplateError::MissingVariable {
                    name: name.to_string(),
                })?;
                out.push_str(&scalar_to_string(name, value)?);
            }
        }
    }

    out.push_str(&template[last..]);
    Ok(out)
}

/// Escape template delimiters so text renders back to itself.
pub fn escape(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}

fn scalar_to_string(name: &str, value: &serde_json::Value) -> Result<String, TemplateError> {
    use serde_json::Value;

    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        Value::Array(_) | Value::Object(_) => Err(TemplateError::NonScalar {
            name: name.to_string(),
        }),
    }
}
