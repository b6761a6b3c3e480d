//! Charts stored as plain manifest directories
//!
//! Layout: `<root>/<chart>/<version>/*.yaml`. Manifests may use the
//! placeholders `${release}`, `${namespace}`, `${version}` and
//! `${values.<path>}`, the latter looked up in the instance values.

use super::{finalize_resources, parse_manifests, ApplicationInstance, ChartId, ChartKey, Charts, RenderedChart};
use anyapp_core::{AnyAppError, Result, SpecificVersion};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct DirectoryCharts {
    root: PathBuf,
}

impl DirectoryCharts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn lookup_value<'a>(values: &'a serde_yaml::Value, path: &str) -> Option<&'a serde_yaml::Value> {
    path.split('.')
        .try_fold(values, |current, segment| current.get(segment))
}

fn scalar_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// Replace placeholders in a manifest template.
fn substitute(template: &str, key: &ChartKey, instance: &ApplicationInstance) -> Result<String> {
    let values: serde_yaml::Value = match &instance.values_yaml {
        Some(yaml) => serde_yaml::from_str(yaml)
            .map_err(|e| AnyAppError::Render(format!("invalid values: {}", e)))?,
        None => serde_yaml::Value::Null,
    };

    let mut out = template
        .replace("${release}", &instance.release_name)
        .replace("${namespace}", &instance.namespace)
        .replace("${version}", &key.version.to_string());

    while let Some(start) = out.find("${values.") {
        let Some(length) = out[start..].find('}') else {
            return Err(AnyAppError::Render(
                "unterminated ${values.} placeholder".to_string(),
            ));
        };
        let path = &out[start + "${values.".len()..start + length];
        let replacement = lookup_value(&values, path)
            .map(scalar_to_string)
            .unwrap_or_default();
        out.replace_range(start..start + length + 1, &replacement);
    }
    Ok(out)
}

#[async_trait]
impl Charts for DirectoryCharts {
    async fn available_versions(&self, chart_id: &ChartId) -> Result<Vec<SpecificVersion>> {
        let chart_dir = self.root.join(&chart_id.chart);
        let mut entries = tokio::fs::read_dir(&chart_dir).await.map_err(|e| {
            AnyAppError::Chart(format!(
                "chart {} not found in {}: {}",
                chart_id.chart,
                self.root.display(),
                e
            ))
        })?;

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match SpecificVersion::parse(&name) {
                Ok(version) => versions.push(version),
                Err(_) => warn!("Ignoring chart directory {}", entry.path().display()),
            }
        }
        versions.sort();
        Ok(versions)
    }

    async fn render(&self, key: &ChartKey, instance: &ApplicationInstance) -> Result<RenderedChart> {
        let version_dir = self
            .root
            .join(&key.chart_id.chart)
            .join(key.version.to_string());
        let mut entries = tokio::fs::read_dir(&version_dir).await.map_err(|e| {
            AnyAppError::Render(format!(
                "chart {} version {} not found: {}",
                key.chart_id.chart, key.version, e
            ))
        })?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_manifest = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            );
            if is_manifest {
                files.push(path);
            }
        }
        files.sort();

        let mut resources = Vec::new();
        for file in &files {
            let template = tokio::fs::read_to_string(file).await?;
            let manifest = substitute(&template, key, instance)?;
            resources.extend(parse_manifests(&manifest)?);
        }
        debug!(
            "Rendered {} resource(s) from {}",
            resources.len(),
            version_dir.display()
        );

        Ok(RenderedChart {
            key: key.clone(),
            instance: instance.clone(),
            resources: finalize_resources(resources, key, instance),
        })
    }
}
