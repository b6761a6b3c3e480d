//! Chart repositories and rendering
//!
//! A chart is identified by repository URL and chart name. Rendering a chart
//! version for an application instance yields the resources to apply, each
//! stamped with the DCP labels and placed in the instance namespace.
//!
//! - [`HelmCharts`] - Helm repositories (`index.yaml`) and `helm template`
//! - [`DirectoryCharts`] - plain manifest directories, for mock mode and tests

mod directory;
mod helm;

pub use directory::DirectoryCharts;
pub use helm::HelmCharts;

use anyapp_core::resource::dcp_labels;
use anyapp_core::{AnyAppError, AnyApplication, ChartVersion, Resource, Result, SpecificVersion};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;

/// Kinds that live outside namespaces
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "PersistentVolume",
    "StorageClass",
    "PriorityClass",
    "IngressClass",
    "ValidatingWebhookConfiguration",
    "MutatingWebhookConfiguration",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChartId {
    pub repository: String,
    pub chart: String,
}

impl ChartId {
    pub fn new(repository: impl Into<String>, chart: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            chart: chart.into(),
        }
    }

    /// Chart referenced by the application's Helm selector
    pub fn for_application(app: &AnyApplication) -> Result<Self> {
        let helm = app.helm().ok_or_else(|| {
            AnyAppError::InvalidInput(format!("application {} has no helm selector", app.id()))
        })?;
        Ok(Self::new(&helm.repository, &helm.chart))
    }
}

impl fmt::Display for ChartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.chart, self.repository)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChartKey {
    pub chart_id: ChartId,
    pub version: SpecificVersion,
}

/// Per-application rendering inputs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApplicationInstance {
    pub instance_id: String,
    pub name: String,
    pub namespace: String,
    pub release_name: String,
    pub values_yaml: Option<String>,
}

impl ApplicationInstance {
    pub fn for_application(app: &AnyApplication) -> Self {
        Self {
            instance_id: app.instance_id(),
            name: app.metadata.name.clone(),
            namespace: app.target_namespace().to_string(),
            release_name: app.metadata.name.clone(),
            values_yaml: app
                .helm()
                .and_then(|h| h.values.clone())
                .filter(|v| !v.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderedChart {
    pub key: ChartKey,
    pub instance: ApplicationInstance,
    pub resources: Vec<Resource>,
}

#[async_trait]
pub trait Charts: Send + Sync {
    /// Versions published for a chart, oldest first
    async fn available_versions(&self, chart_id: &ChartId) -> Result<Vec<SpecificVersion>>;

    /// Pick the version to install for a version reference.
    async fn resolve(&self, chart_id: &ChartId, version: &ChartVersion) -> Result<ChartKey> {
        let available = self.available_versions(chart_id).await?;
        match version.select(&available) {
            Some(version) => Ok(ChartKey {
                chart_id: chart_id.clone(),
                version,
            }),
            None => Err(match version {
                ChartVersion::Specific(v) => AnyAppError::Chart(format!(
                    "Specific version {} not found for chart {}",
                    v, chart_id.chart
                )),
                ChartVersion::Range(_) => AnyAppError::Chart(format!(
                    "Latest version not found for chart {}",
                    chart_id.chart
                )),
            }),
        }
    }

    async fn render(&self, key: &ChartKey, instance: &ApplicationInstance) -> Result<RenderedChart>;

    /// Forget cached repository state.
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

/// Split multi-document YAML into resources, flattening `List` objects.
pub fn parse_manifests(yaml: &str) -> Result<Vec<Resource>> {
    let mut resources = Vec::new();
    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(|e| AnyAppError::Render(format!("invalid manifest: {}", e)))?;
        if value.is_null() {
            continue;
        }
        let value: serde_json::Value = serde_json::to_value(value)
            .map_err(|e| AnyAppError::Render(format!("invalid manifest: {}", e)))?;
        let is_list = value
            .get("kind")
            .and_then(serde_json::Value::as_str)
            .map(|kind| kind.ends_with("List"))
            .unwrap_or(false);
        match value.get("items").and_then(serde_json::Value::as_array) {
            Some(items) if is_list => {
                for item in items {
                    resources.push(Resource::new(item.clone())?);
                }
            }
            _ => resources.push(Resource::new(value)?),
        }
    }
    Ok(resources)
}

/// Stamp DCP labels and the instance namespace on rendered resources.
pub fn finalize_resources(
    resources: Vec<Resource>,
    key: &ChartKey,
    instance: &ApplicationInstance,
) -> Vec<Resource> {
    let labels = dcp_labels(&instance.instance_id, &key.version.to_string());
    resources
        .into_iter()
        .map(|mut resource| {
            resource.set_labels(&labels);
            if !CLUSTER_SCOPED_KINDS.contains(&resource.kind()) {
                resource.set_namespace_if_missing(&instance.namespace);
            }
            resource
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyapp_core::resource::{LABEL_CHART_VERSION, LABEL_INSTANCE_ID};
    use anyapp_core::AnyApplicationSpec;

    struct FixedCharts(Vec<SpecificVersion>);

    #[async_trait]
    impl Charts for FixedCharts {
        async fn available_versions(&self, _chart_id: &ChartId) -> Result<Vec<SpecificVersion>> {
            Ok(self.0.clone())
        }

        async fn render(&self, key: &ChartKey, instance: &ApplicationInstance) -> Result<RenderedChart> {
            Ok(RenderedChart {
                key: key.clone(),
                instance: instance.clone(),
                resources: Vec::new(),
            })
        }
    }

    fn versions(list: &[&str]) -> Vec<SpecificVersion> {
        list.iter().map(|v| SpecificVersion::parse(v).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_resolve_specific_and_range() {
        let charts = FixedCharts(versions(&["1.0.0", "1.2.0", "2.0.0"]));
        let id = ChartId::new("https://charts.example.com", "nginx");

        let key = charts
            .resolve(&id, &ChartVersion::parse("1.2.0").unwrap())
            .await
            .unwrap();
        assert_eq!(key.version.to_string(), "1.2.0");

        let key = charts
            .resolve(&id, &ChartVersion::parse("^1.0").unwrap())
            .await
            .unwrap();
        assert_eq!(key.version.to_string(), "1.2.0");
    }

    #[tokio::test]
    async fn test_resolve_missing_version() {
        let charts = FixedCharts(versions(&["1.0.0"]));
        let id = ChartId::new("https://charts.example.com", "nginx");

        let err = charts
            .resolve(&id, &ChartVersion::parse("3.0.0").unwrap())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Chart error: Specific version 3.0.0 not found for chart nginx"
        );

        let err = charts
            .resolve(&id, &ChartVersion::parse(">=2.0").unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Latest version not found"));
    }

    #[test]
    fn test_parse_manifests_multi_document() {
        let yaml = r#"
---
apiVersion: v1
kind: Service
metadata:
  name: web
---
# empty document
---
apiVersion: v1
kind: List
items:
  - apiVersion: v1
    kind: ConfigMap
    metadata:
      name: a
  - apiVersion: v1
    kind: ConfigMap
    metadata:
      name: b
"#;
        let resources = parse_manifests(yaml).unwrap();
        let names: Vec<&str> = resources.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["web", "a", "b"]);
    }

    #[test]
    fn test_parse_manifests_rejects_nameless() {
        let yaml = "apiVersion: v1\nkind: Service\nmetadata: {}\n";
        assert!(parse_manifests(yaml).is_err());
    }

    #[test]
    fn test_finalize_resources() {
        let yaml = r#"
apiVersion: v1
kind: Service
metadata:
  name: web
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: reader
"#;
        let app = AnyApplication::new("shop", "web", AnyApplicationSpec::default());
        let instance = ApplicationInstance::for_application(&app);
        let key = ChartKey {
            chart_id: ChartId::new("https://charts.example.com", "nginx"),
            version: SpecificVersion::parse("1.2.3").unwrap(),
        };
        let resources = finalize_resources(parse_manifests(yaml).unwrap(), &key, &instance);

        assert_eq!(resources[0].namespace(), "shop");
        assert_eq!(resources[0].label(LABEL_CHART_VERSION), Some("1.2.3"));
        assert_eq!(resources[0].label(LABEL_INSTANCE_ID), Some("shop-web"));
        assert!(resources[0].is_managed());
        assert_eq!(resources[1].namespace(), "");
        assert!(resources[1].is_managed());
    }
}
