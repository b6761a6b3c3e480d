//! API models for the zone daemon REST API
//!
//! This module contains request and response models shared by the daemon
//! and the CLI client.

use crate::types::{AnyApplication, GlobalState};
use serde::{Deserialize, Serialize};

/// Generic API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ApiResponse<T> {
    #[serde(rename = "success")]
    Success { data: T },
    #[serde(rename = "error")]
    Error { error: String },
}

impl<T> ApiResponse<T> {
    /// Create a successful response
    pub fn success(data: T) -> Self {
        Self::Success { data }
    }

    /// Create an error response
    pub fn error(error: String) -> Self {
        Self::Error { error }
    }
}

/// Server information response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    /// Server version
    pub version: String,
    /// Zone this daemon runs in
    pub zone: String,
    /// Server uptime in seconds
    pub uptime: u64,
    /// Peer daemon URLs
    #[serde(default)]
    pub peers: Vec<String>,
    /// Whether the daemon runs against the in-memory cluster
    #[serde(default)]
    pub mock: bool,
    /// Number of applications known to this zone
    pub applications: usize,
    /// Number of async jobs currently running
    pub running_jobs: usize,
}

/// Condensed view of an application for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSummary {
    pub name: String,
    pub namespace: String,
    pub state: GlobalState,
    pub owner: String,
    /// `None` while placement is undecided
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placements: Option<Vec<String>>,
    pub chart: String,
    /// Requested chart version or range
    pub chart_version: String,
    /// Zones that reported a status
    pub zones: Vec<String>,
}

impl From<&AnyApplication> for ApplicationSummary {
    fn from(app: &AnyApplication) -> Self {
        let (chart, chart_version) = app
            .helm()
            .map(|h| (h.chart.clone(), h.version.clone()))
            .unwrap_or_default();
        Self {
            name: app.metadata.name.clone(),
            namespace: app.metadata.namespace.clone(),
            state: app.status.state,
            owner: app.status.owner.clone(),
            placements: app
                .status
                .placements
                .as_ref()
                .map(|p| p.iter().map(|p| p.zone.clone()).collect()),
            chart,
            chart_version,
            zones: app.status.zones.iter().map(|z| z.zone_id.clone()).collect(),
        }
    }
}

/// Placement update for applications with the `Global` strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementRequest {
    pub zones: Vec<String>,
}

/// Logs of one container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogInfo {
    pub container: String,
    pub log: String,
}

/// A pod of the application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub status: String,
    pub restarts: i64,
    #[serde(default)]
    pub logs: Vec<LogInfo>,
}

/// Replica counts and health of a workload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadReport {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub desired: i64,
    pub ready: i64,
    pub available: i64,
    pub unavailable: i64,
    #[serde(default)]
    pub message: String,
}

/// Runtime report of an application in this zone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationReport {
    pub name: String,
    pub namespace: String,
    pub zone: String,
    pub state: GlobalState,
    pub workloads: Vec<WorkloadReport>,
    pub pods: Vec<PodInfo>,
}

/// Resource requests and limits of one replica of a workload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodResources {
    /// `Kind/name` of the owning workload
    pub id: String,
    pub replica: i64,
    #[serde(default)]
    pub requests: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub limits: std::collections::BTreeMap<String, String>,
}

/// Storage requested by a claim or claim template
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PvcResources {
    pub id: String,
    pub replica: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    pub storage: String,
}

/// Resource footprint of the rendered chart
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationSpecReport {
    pub name: String,
    pub namespace: String,
    pub pods: Vec<PodResources>,
    pub pvcs: Vec<PvcResources>,
}

/// An event emitted for an application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub reason: String,
    pub msg: String,
}
