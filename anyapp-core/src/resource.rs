//! Unstructured cluster resources and the labels the controller manages

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{AnyAppError, Result};

/// Label marking resources owned by the controller
pub const LABEL_MANAGED_BY: &str = "dcp.hiro.io/managed-by";
/// Value of [`LABEL_MANAGED_BY`]
pub const MANAGED_BY_VALUE: &str = "dcp";
/// Label carrying the chart version a resource was rendered from
pub const LABEL_CHART_VERSION: &str = "dcp.hiro.io/chart-version";
/// Label carrying the application instance id
pub const LABEL_INSTANCE_ID: &str = "dcp.hiro.io/instance-id";

const WORKLOAD_KINDS: &[&str] = &[
    "Deployment",
    "StatefulSet",
    "DaemonSet",
    "ReplicaSet",
    "Job",
];

/// Identity of a resource: group, kind, namespace and name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    /// `group/kind`, with an empty group for core resources (`/Pod`)
    pub fn group_kind(&self) -> String {
        format!("{}/{}", self.group, self.kind)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.group_kind(), self.namespace, self.name)
    }
}

/// An unstructured Kubernetes object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(Value);

impl Resource {
    /// Wrap a JSON object, rejecting values without `kind` or `metadata.name`.
    pub fn new(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(AnyAppError::InvalidInput(
                "resource must be an object".to_string(),
            ));
        }
        let resource = Self(value);
        if resource.kind().is_empty() || resource.name().is_empty() {
            return Err(AnyAppError::InvalidInput(
                "resource must have kind and metadata.name".to_string(),
            ));
        }
        Ok(resource)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    fn str_field(&self, pointer: &str) -> &str {
        self.0.pointer(pointer).and_then(Value::as_str).unwrap_or("")
    }

    pub fn kind(&self) -> &str {
        self.str_field("/kind")
    }

    pub fn api_version(&self) -> &str {
        self.str_field("/apiVersion")
    }

    pub fn name(&self) -> &str {
        self.str_field("/metadata/name")
    }

    pub fn namespace(&self) -> &str {
        self.str_field("/metadata/namespace")
    }

    /// API group parsed from `apiVersion` (`apps/v1` → `apps`, `v1` → ``)
    pub fn group(&self) -> &str {
        match self.api_version().split_once('/') {
            Some((group, _)) => group,
            None => "",
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            group: self.group().to_string(),
            kind: self.kind().to_string(),
            namespace: self.namespace().to_string(),
            name: self.name().to_string(),
        }
    }

    /// `namespace/name (Kind)`
    pub fn full_name(&self) -> String {
        format!("{}/{} ({})", self.namespace(), self.name(), self.kind())
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.0
            .pointer("/metadata/labels")
            .and_then(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.0
            .pointer("/metadata/labels")
            .and_then(|labels| labels.get(key))
            .and_then(Value::as_str)
    }

    /// Merge labels into the object metadata and, for workloads, the pod template.
    pub fn set_labels(&mut self, labels: &BTreeMap<String, String>) {
        let is_workload = WORKLOAD_KINDS.contains(&self.kind());
        merge_labels(&mut self.0, &["metadata"], labels);
        if is_workload {
            merge_labels(&mut self.0, &["spec", "template", "metadata"], labels);
        }
    }

    pub fn set_namespace_if_missing(&mut self, namespace: &str) {
        if !self.namespace().is_empty() {
            return;
        }
        if let Some(metadata) = object_at(&mut self.0, &["metadata"]) {
            metadata.insert(
                "namespace".to_string(),
                Value::String(namespace.to_string()),
            );
        }
    }

    /// Whether the resource is marked as managed by the controller
    pub fn is_managed(&self) -> bool {
        self.label(LABEL_MANAGED_BY) == Some(MANAGED_BY_VALUE)
    }
}

/// Walk (creating as needed) nested objects along `path`.
fn object_at<'a>(value: &'a mut Value, path: &[&str]) -> Option<&'a mut Map<String, Value>> {
    let mut current = value;
    for segment in path {
        let map = current.as_object_mut()?;
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    current.as_object_mut()
}

fn merge_labels(value: &mut Value, path: &[&str], labels: &BTreeMap<String, String>) {
    let Some(metadata) = object_at(value, path) else {
        return;
    };
    let entry = metadata
        .entry("labels".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Some(map) = entry.as_object_mut() {
        for (k, v) in labels {
            map.insert(k.clone(), Value::String(v.clone()));
        }
    }
}

/// The labels stamped on every rendered resource of an application instance.
pub fn dcp_labels(instance_id: &str, chart_version: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string()),
        (LABEL_CHART_VERSION.to_string(), chart_version.to_string()),
        (LABEL_INSTANCE_ID.to_string(), instance_id.to_string()),
    ])
}
