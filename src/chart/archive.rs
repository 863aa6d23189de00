//! Chart archive loading
//!
//! A chart is a gzip-compressed tarball with a single top-level directory:
//!
//! ```text
//! reviews-api/Chart.yaml
//! reviews-api/values.yaml
//! reviews-api/templates/deployment.yaml
//! reviews-api/templates/_helpers.tpl
//! ```
//!
//! Anything outside `Chart.yaml`, `values.yaml` and `templates/` is ignored.

use std::io::Read;
use std::path::{Component, Path};

use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::Value;
use tar::Archive;

use crate::error::ShipyardError;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// One file under `templates/`
#[derive(Debug, Clone)]
pub struct Template {
    /// Path relative to the chart root, e.g. `templates/service.yaml`
    pub name: String,
    pub source: String,
}

impl Template {
    /// Partials are only reachable through `include`/`import`
    pub fn is_partial(&self) -> bool {
        Path::new(&self.name)
            .file_name()
            .and_then(|f| f.to_str())
            .is_some_and(|f| f.starts_with('_'))
    }

    fn is_renderable(&self) -> bool {
        !self.is_partial()
            && [".yaml", ".yml", ".tpl"]
                .iter()
                .any(|ext| self.name.ends_with(ext))
    }
}

#[derive(Debug, Clone)]
pub struct Chart {
    pub metadata: ChartMetadata,
    /// Default values, always a JSON object
    pub values: Value,
    pub templates: Vec<Template>,
}

impl Chart {
    /// Templates producing manifests, in archive order
    pub fn renderable(&self) -> impl Iterator<Item = &Template> {
        self.templates.iter().filter(|t| t.is_renderable())
    }
}

/// Parse a chart archive
pub fn load(bytes: &[u8]) -> Result<Chart, ShipyardError> {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    let entries = archive
        .entries()
        .map_err(|e| ShipyardError::render(format!("failed to read chart archive: {}", e)))?;

    let mut metadata = None;
    let mut values = None;
    let mut templates = Vec::new();

    for entry in entries {
        let mut entry = entry
            .map_err(|e| ShipyardError::render(format!("failed to read chart archive: {}", e)))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry
            .path()
            .map_err(|e| ShipyardError::render(format!("invalid archive entry path: {}", e)))?
            .into_owned();
        let Some(relative) = chart_relative(&path) else {
            continue;
        };

        let mut source = String::new();
        entry.read_to_string(&mut source).map_err(|e| {
            ShipyardError::render(format!("failed to read {}: {}", path.display(), e))
        })?;

        match relative.as_str() {
            "Chart.yaml" => {
                let parsed: ChartMetadata = serde_yaml::from_str(&source)
                    .map_err(|e| ShipyardError::render(format!("invalid Chart.yaml: {}", e)))?;
                metadata = Some(parsed);
            }
            "values.yaml" => {
                let parsed: Option<Value> = serde_yaml::from_str(&source)
                    .map_err(|e| ShipyardError::render(format!("invalid values.yaml: {}", e)))?;
                values = parsed;
            }
            name if name.starts_with("templates/") => templates.push(Template {
                name: relative,
                source,
            }),
            _ => {}
        }
    }

    let metadata =
        metadata.ok_or_else(|| ShipyardError::render("chart archive has no Chart.yaml"))?;
    let values = match values {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(v @ Value::Object(_)) => v,
        Some(_) => return Err(ShipyardError::render("values.yaml must be a mapping")),
    };

    tracing::debug!(
        chart = %metadata.name,
        version = %metadata.version,
        templates = templates.len(),
        "loaded chart"
    );

    Ok(Chart {
        metadata,
        values,
        templates,
    })
}

/// Strip the chart directory, rejecting anything that climbs out of it
fn chart_relative(path: &Path) -> Option<String> {
    let mut components = path.components().filter(|c| !matches!(c, Component::CurDir));
    components.next()?;
    let mut parts = Vec::new();
    for component in components {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
