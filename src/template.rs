//! Expansion of `{{ ... }}` references in alert label values.
//!
//! Only variable substitution is supported. An action may reference one of
//! the four bindings, either through its variable or its field form:
//!
//! | variable          | field             | renders                      |
//! |-------------------|-------------------|------------------------------|
//! | `$labels`         | `.Labels`         | sample labels                |
//! | `$externalLabels` | `.ExternalLabels` | external labels              |
//! | `$externalURL`    | `.ExternalURL`    | external URL of the backend  |
//! | `$value`          | `.Value`          | sample value                 |
//!
//! Label maps are indexed with `$labels.instance`; a missing label renders
//! as the empty string. `{{/* ... */}}` comments render as nothing.

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

/// Data an expansion is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub labels: &'a BTreeMap<String, String>,
    pub external_labels: &'a BTreeMap<String, String>,
    pub external_url: &'a str,
    pub value: f64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unclosed action")]
    Unclosed,
    #[error("missing value for command")]
    EmptyAction,
    #[error("undefined variable \"{0}\"")]
    UndefinedVariable(String),
    #[error("can't evaluate field {0}")]
    UnknownField(String),
    #[error("unsupported action \"{0}\"")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy)]
enum Binding {
    Labels,
    ExternalLabels,
    ExternalUrl,
    Value,
}

/// Expands every action in `text`.
pub fn expand(text: &str, ctx: &TemplateContext<'_>) -> Result<String, TemplateError> {
    if !text.contains("{{") {
        return Ok(text.to_string());
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let close = after.find("}}").ok_or(TemplateError::Unclosed)?;
        out.push_str(&eval(&after[..close], ctx)?);
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn eval(action: &str, ctx: &TemplateContext<'_>) -> Result<String, TemplateError> {
    let action = action.trim();
    if action.is_empty() {
        return Err(TemplateError::EmptyAction);
    }
    if action.starts_with("/*") && action.ends_with("*/") {
        return Ok(String::new());
    }
    if action.len() >= 2 && action.starts_with('"') && action.ends_with('"') {
        return Ok(action[1..action.len() - 1].to_string());
    }
    if action.contains(char::is_whitespace) {
        return Err(TemplateError::Unsupported(action.to_string()));
    }

    let (binding, path) = if let Some(var) = action.strip_prefix('$') {
        let (name, path) = split_path(var);
        let binding = match name {
            "labels" => Binding::Labels,
            "externalLabels" => Binding::ExternalLabels,
            "externalURL" => Binding::ExternalUrl,
            "value" => Binding::Value,
            _ => return Err(TemplateError::UndefinedVariable(format!("${name}"))),
        };
        (binding, path)
    } else if let Some(field) = action.strip_prefix('.') {
        let (name, path) = split_path(field);
        let binding = match name {
            "Labels" => Binding::Labels,
            "ExternalLabels" => Binding::ExternalLabels,
            "ExternalURL" => Binding::ExternalUrl,
            "Value" => Binding::Value,
            _ => return Err(TemplateError::UnknownField(name.to_string())),
        };
        (binding, path)
    } else {
        return Err(TemplateError::Unsupported(action.to_string()));
    };

    resolve(binding, path, ctx)
}

fn split_path(s: &str) -> (&str, Option<&str>) {
    match s.split_once('.') {
        Some((name, path)) => (name, Some(path)),
        None => (s, None),
    }
}

fn resolve(
    binding: Binding,
    path: Option<&str>,
    ctx: &TemplateContext<'_>,
) -> Result<String, TemplateError> {
    match (binding, path) {
        (Binding::Labels, Some(key)) => lookup(ctx.labels, key),
        (Binding::ExternalLabels, Some(key)) => lookup(ctx.external_labels, key),
        (Binding::Labels, None) => Ok(render_map(ctx.labels)),
        (Binding::ExternalLabels, None) => Ok(render_map(ctx.external_labels)),
        (Binding::ExternalUrl, None) => Ok(ctx.external_url.to_string()),
        (Binding::Value, None) => Ok(format_value(ctx.value)),
        (Binding::ExternalUrl | Binding::Value, Some(field)) => {
            Err(TemplateError::UnknownField(field.to_string()))
        }
    }
}

fn lookup(map: &BTreeMap<String, String>, key: &str) -> Result<String, TemplateError> {
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(TemplateError::UnknownField(key.to_string()));
    }
    Ok(map.get(key).cloned().unwrap_or_default())
}

fn render_map(map: &BTreeMap<String, String>) -> String {
    let pairs: Vec<String> = map.iter().map(|(k, v)| format!("{k}:{v}")).collect();
    format!("map[{}]", pairs.join(" "))
}

fn format_value(value: f64) -> String {
    if value.is_infinite() {
        if value > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else {
        value.to_string()
    }
}

/// Expands label values for one backend, logging instead of failing.
#[derive(Debug, Clone, Default)]
pub struct TemplateExpander {
    external_labels: BTreeMap<String, String>,
    external_url: String,
}

impl TemplateExpander {
    pub fn new(external_labels: BTreeMap<String, String>, external_url: impl Into<String>) -> Self {
        Self {
            external_labels,
            external_url: external_url.into(),
        }
    }

    /// Expands `text`; on failure the result is an inline error marker.
    pub fn expand(&self, name: &str, text: &str, labels: &BTreeMap<String, String>, value: f64) -> String {
        let ctx = TemplateContext {
            labels,
            external_labels: &self.external_labels,
            external_url: &self.external_url,
            value,
        };
        match expand(text, &ctx) {
            Ok(result) => result,
            Err(e) => {
                warn!(template = %name, text = %text, "Expanding template failed: {}", e);
                format!("<error expanding template: {e}>")
            }
        }
    }
}
