//! The `AnyApplication` resource: metadata and desired state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::status::AnyApplicationStatus;
use crate::error::{AnyAppError, Result};

/// API version of the resource
pub const API_VERSION: &str = "dcp.hiro.io/v1";
/// Kind of the resource
pub const KIND: &str = "AnyApplication";
/// Finalizer held while the application still has resources in some zone
pub const FINALIZER: &str = "anyapplication.finalizers.hiro.io";

/// Name and namespace of an application
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApplicationId {
    pub name: String,
    pub namespace: String,
}

impl ApplicationId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Parse `namespace/name`; a bare name lands in `default`.
    pub fn parse(input: &str) -> Result<Self> {
        let (namespace, name) = input.split_once('/').unwrap_or(("default", input));
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return Err(AnyAppError::InvalidInput(format!(
                "expected <namespace>/<name>, got '{}'",
                input
            )));
        }
        Ok(Self::new(namespace, name))
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Object metadata, trimmed to what the controller uses
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub generation: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Helm chart reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmSelectorSpec {
    pub repository: String,
    pub chart: String,
    pub version: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<String>,
}

/// What the application is made of
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationMatcherSpec {
    #[serde(
        rename = "resourceSelector",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub resource_selector: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmSelectorSpec>,
}

/// Who decides placements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementStrategy {
    /// The owner zone places the application on itself
    #[default]
    Local,
    /// Placements are set externally (through the API)
    Global,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementStrategySpec {
    #[serde(default)]
    pub strategy: PlacementStrategy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverStrategySpec {
    /// Number of unhealthy zones tolerated before the application fails
    #[serde(default)]
    pub tolerance: u32,
    /// Deployment retries after a failed deployment
    #[serde(rename = "max-retries", default)]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPolicySpec {
    /// `key=value` options, e.g. `syncTimeout=2m`
    #[serde(rename = "syncOptions", default, skip_serializing_if = "Vec::is_empty")]
    pub sync_options: Vec<String>,
}

/// Desired state of an application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnyApplicationSpec {
    pub application: ApplicationMatcherSpec,
    #[serde(default = "default_zones")]
    pub zones: u32,
    #[serde(rename = "placement-strategy", default)]
    pub placement_strategy: PlacementStrategySpec,
    #[serde(rename = "recover-strategy", default)]
    pub recover_strategy: RecoverStrategySpec,
    #[serde(rename = "sync-policy", default)]
    pub sync_policy: SyncPolicySpec,
}

impl Default for AnyApplicationSpec {
    fn default() -> Self {
        Self {
            application: ApplicationMatcherSpec::default(),
            zones: default_zones(),
            placement_strategy: PlacementStrategySpec::default(),
            recover_strategy: RecoverStrategySpec::default(),
            sync_policy: SyncPolicySpec::default(),
        }
    }
}

fn default_zones() -> u32 {
    1
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

/// A multi-zone application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnyApplication {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: AnyApplicationSpec,
    #[serde(default)]
    pub status: AnyApplicationStatus,
}

impl AnyApplication {
    pub fn new(namespace: &str, name: &str, spec: AnyApplicationSpec) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: namespace.to_string(),
                ..ObjectMeta::default()
            },
            spec,
            status: AnyApplicationStatus::default(),
        }
    }

    pub fn id(&self) -> ApplicationId {
        ApplicationId::new(&self.metadata.namespace, &self.metadata.name)
    }

    /// Identifier stamped on every resource of this application
    pub fn instance_id(&self) -> String {
        format!("{}-{}", self.metadata.namespace, self.metadata.name)
    }

    pub fn helm(&self) -> Option<&HelmSelectorSpec> {
        self.spec.application.helm.as_ref()
    }

    /// Namespace the chart is installed into
    pub fn target_namespace(&self) -> &str {
        match self.helm() {
            Some(helm) if !helm.namespace.is_empty() => &helm.namespace,
            _ => &self.metadata.namespace,
        }
    }

    pub fn has_zone_status(&self, zone: &str) -> bool {
        self.status.zone_exists(zone)
    }

    /// Bump the zone version past both the resource version and its own value.
    pub fn increment_zone_version(&mut self, zone: &str) {
        let resource_version = self.metadata.resource_version as i64;
        if let Some(zone_status) = self.status.status_for_mut(zone) {
            let mut latest = resource_version + 1;
            if zone_status.zone_version >= latest {
                latest = zone_status.zone_version + 1;
            }
            zone_status.zone_version = latest;
        }
    }

    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata.finalizers.iter().any(|f| f == finalizer)
    }

    /// Returns true when the finalizer was added.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.metadata.finalizers.push(finalizer.to_string());
        true
    }

    /// Returns true when the finalizer was removed.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.metadata.finalizers.len();
        self.metadata.finalizers.retain(|f| f != finalizer);
        before != self.metadata.finalizers.len()
    }

    /// Check the user-supplied parts of the resource.
    pub fn validate(&self) -> Result<()> {
        if !is_dns_label(&self.metadata.name) {
            return Err(AnyAppError::InvalidInput(format!(
                "invalid application name '{}'",
                self.metadata.name
            )));
        }
        if !is_dns_label(&self.metadata.namespace) {
            return Err(AnyAppError::InvalidInput(format!(
                "invalid namespace '{}'",
                self.metadata.namespace
            )));
        }
        let helm = self.helm().ok_or_else(|| {
            AnyAppError::InvalidInput("spec.application.helm is required".to_string())
        })?;
        if helm.repository.trim().is_empty() {
            return Err(AnyAppError::InvalidInput(
                "helm repository is required".to_string(),
            ));
        }
        if helm.chart.trim().is_empty() {
            return Err(AnyAppError::InvalidInput("helm chart is required".to_string()));
        }
        crate::version::ChartVersion::parse(&helm.version)?;
        if self.spec.zones == 0 {
            return Err(AnyAppError::InvalidInput(
                "zones must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_dns_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 63
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !value.starts_with('-')
        && !value.ends_with('-')
}
