//! Chart template rendering
//!
//! Templates are rendered with minijinja. Helm-style references
//! (`{{ .Values.image }}`, `{{ .Release.Name }}`) are accepted by stripping
//! the leading dot before compilation, and the handful of Helm filters charts
//! lean on are registered under their Helm names.

use kube::core::DynamicObject;
use minijinja::{Environment, Error, ErrorKind, Value};
use serde_json::Value as JsonValue;

use super::archive::Chart;
use crate::constants::RELEASE_SERVICE;
use crate::error::ShipyardError;

/// Release identity exposed to templates as `Release`
#[derive(Debug, Clone)]
pub struct ReleaseContext<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub values: Option<&'a JsonValue>,
}

/// Render every template of `chart` into Kubernetes objects, in archive order
pub fn render(chart: &Chart, release: &ReleaseContext<'_>) -> Result<Vec<DynamicObject>, ShipyardError> {
    let sources: Vec<(&str, String)> = chart
        .templates
        .iter()
        .map(|t| (t.name.as_str(), normalize_template(&t.source)))
        .collect();

    let env = environment(&sources)?;

    let mut values = chart.values.clone();
    if let Some(overrides) = release.values {
        merge_values(&mut values, overrides);
    }
    let context = Value::from_serialize(serde_json::json!({
        "Release": {
            "Name": release.name,
            "Namespace": release.namespace,
            "Service": RELEASE_SERVICE,
        },
        "Chart": {
            "Name": chart.metadata.name,
            "Version": chart.metadata.version,
        },
        "Values": values,
    }));

    let mut objects = Vec::new();
    for template in chart.renderable() {
        let rendered = env
            .get_template(&template.name)
            .and_then(|t| t.render(&context))
            .map_err(|e| ShipyardError::render(format!("{}: {:#}", template.name, e)))?;
        objects.extend(decode_documents(&template.name, &rendered)?);
    }

    tracing::debug!(
        chart = %chart.metadata.name,
        release = release.name,
        objects = objects.len(),
        "rendered chart"
    );
    Ok(objects)
}

fn environment<'s>(sources: &'s [(&'s str, String)]) -> Result<Environment<'s>, ShipyardError> {
    let mut env = Environment::new();
    env.add_filter("quote", quote);
    env.add_filter("toYaml", to_yaml);
    env.add_filter("to_yaml", to_yaml);
    env.add_filter("default", default);
    env.add_filter("indent", indent);
    env.add_filter("nindent", nindent);
    env.add_filter("trunc", trunc);

    for (name, source) in sources {
        env.add_template(*name, source.as_str())
            .map_err(|e| ShipyardError::render(format!("{}: {:#}", name, e)))?;
    }
    Ok(env)
}

/// Split a rendered file into its YAML documents and decode each one
fn decode_documents(template: &str, rendered: &str) -> Result<Vec<DynamicObject>, ShipyardError> {
    let mut objects = Vec::new();
    for doc in split_documents(rendered) {
        let value: JsonValue = serde_yaml::from_str(doc)
            .map_err(|e| ShipyardError::render(format!("{}: invalid YAML: {}", template, e)))?;
        if value.is_null() {
            continue;
        }

        for field in ["apiVersion", "kind"] {
            if !value.get(field).is_some_and(|v| v.as_str().is_some_and(|s| !s.is_empty())) {
                return Err(ShipyardError::render(format!(
                    "{}: object has no {}",
                    template, field
                )));
            }
        }
        let has_name = value
            .pointer("/metadata/name")
            .and_then(JsonValue::as_str)
            .is_some_and(|s| !s.is_empty());
        if !has_name {
            return Err(ShipyardError::render(format!(
                "{}: object has no metadata.name",
                template
            )));
        }

        let object: DynamicObject = serde_json::from_value(value)
            .map_err(|e| ShipyardError::render(format!("{}: {}", template, e)))?;
        objects.push(object);
    }
    Ok(objects)
}

fn split_documents(rendered: &str) -> Vec<&str> {
    let mut docs = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    for line in rendered.split_inclusive('\n') {
        if line.trim_end() == "---" {
            docs.push(&rendered[start..offset]);
            start = offset + line.len();
        }
        offset += line.len();
    }
    docs.push(&rendered[start..]);
    docs.into_iter()
        .filter(|d| {
            d.lines()
                .map(str::trim)
                .any(|l| !l.is_empty() && !l.starts_with('#'))
        })
        .collect()
}

/// Deep-merge `overrides` into `base`; mappings merge, everything else replaces
pub fn merge_values(base: &mut JsonValue, overrides: &JsonValue) {
    match (base, overrides) {
        (JsonValue::Object(base), JsonValue::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overrides) => *base = overrides.clone(),
    }
}

/// Drop the leading dot of Helm-style references inside `{{ }}` and `{% %}`
fn normalize_template(source: &str) -> String {
    let mut result = String::with_capacity(source.len());
    let mut remaining = source;

    loop {
        let next = ["{{", "{%"]
            .iter()
            .filter_map(|open| remaining.find(open).map(|i| (i, *open)))
            .min_by_key(|(i, _)| *i);
        let Some((start, open)) = next else {
            break;
        };
        let close = if open == "{{" { "}}" } else { "%}" };

        result.push_str(&remaining[..start + 2]);
        remaining = &remaining[start + 2..];

        match remaining.find(close) {
            Some(end) => {
                result.push_str(&strip_leading_dots(&remaining[..end]));
                result.push_str(close);
                remaining = &remaining[end + 2..];
            }
            None => {
                result.push_str(remaining);
                remaining = "";
            }
        }
    }

    result.push_str(remaining);
    result
}

fn strip_leading_dots(expr: &str) -> String {
    let mut result = String::with_capacity(expr.len());
    let mut chars = expr.chars().peekable();
    let mut in_single_quote = false;
    let mut in_double_quote = false;

    while let Some(ch) = chars.next() {
        match ch {
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                result.push(ch);
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                result.push(ch);
            }
            '.' if !in_single_quote && !in_double_quote => {
                let prev_binds = result
                    .chars()
                    .last()
                    .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | ')' | ']'));
                let next_is_ident = chars
                    .peek()
                    .is_some_and(|c| c.is_alphabetic() || *c == '_');
                if prev_binds || !next_is_ident {
                    result.push('.');
                }
            }
            _ => result.push(ch),
        }
    }

    result
}

fn quote(value: Value) -> String {
    if value.is_undefined() || value.is_none() {
        return "\"\"".to_string();
    }
    let raw = value.to_string();
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

fn to_yaml(value: Value) -> Result<String, Error> {
    let yaml = serde_yaml::to_string(&value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    Ok(yaml.trim_end_matches('\n').to_string())
}

fn default(value: Value, fallback: Option<Value>) -> Value {
    if value.is_true() {
        value
    } else {
        fallback.unwrap_or_else(|| Value::from(""))
    }
}

fn indent(value: String, width: usize) -> String {
    let pad = " ".repeat(width);
    let mut out = String::with_capacity(value.len() + width);
    for (i, line) in value.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&pad);
        out.push_str(line);
    }
    out
}

fn nindent(value: String, width: usize) -> String {
    format!("\n{}", indent(value, width))
}

fn trunc(value: String, length: i64) -> String {
    let count = value.chars().count();
    let keep = length.unsigned_abs() as usize;
    if keep >= count {
        return value;
    }
    if length >= 0 {
        value.chars().take(keep).collect()
    } else {
        value.chars().skip(count - keep).collect()
    }
}
