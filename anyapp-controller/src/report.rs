//! Application reports for the REST API
//!
//! - [`Reports::report`] describes what runs in this zone: workloads with
//!   replica counts, pods with restarts and recent logs.
//! - [`Reports::spec_report`] describes what the rendered chart asks for:
//!   per-replica requests and limits, and persistent volume claims.

use crate::applications::Applications;
use crate::cluster::{is_owned, Cluster};
use anyapp_core::api::{
    ApplicationReport, ApplicationSpecReport, LogInfo, PodInfo, PodResources, PvcResources,
    WorkloadReport,
};
use anyapp_core::quantity::Quantity;
use anyapp_core::{AnyApplication, Resource, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Log lines fetched per container
pub const LOG_TAIL_LINES: usize = 50;

const HEALTHY: &str = "Healthy";
const REPORTED_WORKLOADS: &[&str] = &["Deployment", "ReplicaSet", "StatefulSet", "DaemonSet"];
const POD_TEMPLATE_KINDS: &[&str] = &["Deployment", "StatefulSet", "DaemonSet", "ReplicaSet", "Job"];

fn int_at(value: &Value, pointer: &str) -> Option<i64> {
    value.pointer(pointer).and_then(Value::as_i64)
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn array_at<'a>(value: &'a Value, pointer: &str) -> &'a [Value] {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Replica counts of a workload; `None` for other kinds and owned replica sets.
pub fn workload_report(resource: &Resource) -> Option<WorkloadReport> {
    let value = resource.value();
    let (desired, available, ready, message) = match resource.kind() {
        "Deployment" => {
            let desired = int_at(value, "/spec/replicas").unwrap_or(1);
            let available = int_at(value, "/status/availableReplicas").unwrap_or(0);
            let ready = int_at(value, "/status/readyReplicas").unwrap_or(0);
            let unavailable = desired - available;
            let message = if unavailable > 0 {
                format!("{} of {} replicas unavailable", unavailable, desired)
            } else {
                HEALTHY.to_string()
            };
            (desired, available, ready, message)
        }
        "ReplicaSet" if !is_owned(resource) => {
            let desired = int_at(value, "/spec/replicas").unwrap_or(1);
            let ready = int_at(value, "/status/readyReplicas").unwrap_or(0);
            let message = if ready < desired {
                format!("orphaned replicaset not fully ready ({}/{})", ready, desired)
            } else {
                HEALTHY.to_string()
            };
            (desired, ready, ready, message)
        }
        "StatefulSet" => {
            let desired = int_at(value, "/spec/replicas").unwrap_or(1);
            let ready = int_at(value, "/status/readyReplicas").unwrap_or(0);
            let message = if ready < desired {
                format!("statefulset not fully ready ({}/{})", ready, desired)
            } else {
                HEALTHY.to_string()
            };
            (desired, ready, ready, message)
        }
        "DaemonSet" => {
            let desired = int_at(value, "/status/desiredNumberScheduled").unwrap_or(0);
            let ready = int_at(value, "/status/numberReady").unwrap_or(0);
            let message = if ready < desired {
                format!("{} daemon pods unavailable", desired - ready)
            } else {
                HEALTHY.to_string()
            };
            (desired, ready, ready, message)
        }
        _ => return None,
    };

    Some(WorkloadReport {
        kind: resource.kind().to_string(),
        name: resource.name().to_string(),
        namespace: resource.namespace().to_string(),
        desired,
        ready,
        available,
        unavailable: (desired - available).max(0),
        message,
    })
}

/// Phase, or the reason a container is waiting or terminated
fn pod_status(pod: &Value) -> (String, i64) {
    let mut status = str_at(pod, "/status/phase").unwrap_or("Unknown").to_string();
    let mut restarts = 0;
    for container in array_at(pod, "/status/containerStatuses") {
        restarts += int_at(container, "/restartCount").unwrap_or(0);
        if let Some(reason) = str_at(container, "/state/waiting/reason")
            .or_else(|| str_at(container, "/state/terminated/reason"))
        {
            status = reason.to_string();
        }
    }
    (status, restarts)
}

fn container_names(pod: &Value) -> Vec<String> {
    let statuses = array_at(pod, "/status/containerStatuses");
    let source = if statuses.is_empty() {
        array_at(pod, "/spec/containers")
    } else {
        statuses
    };
    source
        .iter()
        .filter_map(|c| c.get("name").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

fn format_quantities(totals: BTreeMap<String, Quantity>) -> BTreeMap<String, String> {
    totals
        .into_iter()
        .map(|(name, quantity)| {
            let formatted = if name == "cpu" {
                quantity.to_cpu_string()
            } else {
                quantity.to_bytes_string()
            };
            (name, formatted)
        })
        .collect()
}

fn add_quantities(totals: &mut BTreeMap<String, Quantity>, section: Option<&Value>) {
    let Some(entries) = section.and_then(Value::as_object) else {
        return;
    };
    for (name, raw) in entries {
        let parsed = match raw {
            Value::String(s) => Quantity::parse(s),
            Value::Number(n) => Quantity::parse(&n.to_string()),
            _ => continue,
        };
        match parsed {
            Ok(quantity) => {
                let total = totals.entry(name.to_lowercase()).or_default();
                *total = *total + quantity;
            }
            Err(e) => debug!("Skipping quantity {}: {}", name, e),
        }
    }
}

/// Requests and limits of one replica, summed over containers and init containers
fn pod_resources(id: String, replica: i64, pod_spec: &Value) -> PodResources {
    let mut requests = BTreeMap::new();
    let mut limits = BTreeMap::new();
    let containers = array_at(pod_spec, "/containers")
        .iter()
        .chain(array_at(pod_spec, "/initContainers"));
    for container in containers {
        add_quantities(&mut requests, container.pointer("/resources/requests"));
        add_quantities(&mut limits, container.pointer("/resources/limits"));
    }
    PodResources {
        id,
        replica,
        requests: format_quantities(requests),
        limits: format_quantities(limits),
    }
}

fn claim_resources(id: String, replica: i64, claim_spec: &Value) -> PvcResources {
    let storage = str_at(claim_spec, "/resources/requests/storage")
        .and_then(|s| Quantity::parse(s).ok())
        .map(|q| q.to_bytes_string())
        .unwrap_or_default();
    PvcResources {
        id,
        replica,
        storage_class: str_at(claim_spec, "/storageClassName").map(str::to_string),
        storage,
    }
}

/// Pods and claims a rendered resource asks for
pub fn resource_requirements(resource: &Resource) -> (Option<PodResources>, Vec<PvcResources>) {
    let value = resource.value();
    let id = format!("{}/{}", resource.kind(), resource.name());
    let kind = resource.kind();

    if kind == "PersistentVolumeClaim" {
        let claim = value
            .get("spec")
            .map(|spec| claim_resources(id, 1, spec));
        return (None, claim.into_iter().collect());
    }
    if kind == "Pod" {
        let pod = value.get("spec").map(|spec| pod_resources(id, 1, spec));
        return (pod, Vec::new());
    }
    if !POD_TEMPLATE_KINDS.contains(&kind) {
        return (None, Vec::new());
    }

    let replicas = match kind {
        "Deployment" | "StatefulSet" | "ReplicaSet" => int_at(value, "/spec/replicas").unwrap_or(1),
        _ => 1,
    };
    let pod = value
        .pointer("/spec/template/spec")
        .map(|spec| pod_resources(id, replicas, spec));
    let claims = array_at(value, "/spec/volumeClaimTemplates")
        .iter()
        .filter_map(|template| {
            let name = str_at(template, "/metadata/name")?;
            let spec = template.get("spec")?;
            Some(claim_resources(
                format!("PersistentVolumeClaim/{}", name),
                replicas,
                spec,
            ))
        })
        .collect();
    (pod, claims)
}

pub struct Reports {
    applications: Arc<dyn Applications>,
    cluster: Arc<dyn Cluster>,
    zone: String,
}

impl Reports {
    pub fn new(
        applications: Arc<dyn Applications>,
        cluster: Arc<dyn Cluster>,
        zone: impl Into<String>,
    ) -> Self {
        Self {
            applications,
            cluster,
            zone: zone.into(),
        }
    }

    pub async fn report(&self, app: &AnyApplication) -> Result<ApplicationReport> {
        let mut resources = self.applications.managed_resources(app).await?;
        resources.sort_by(|a, b| a.name().cmp(b.name()));

        let mut workloads = Vec::new();
        for kind in REPORTED_WORKLOADS {
            workloads.extend(
                resources
                    .iter()
                    .filter(|r| r.kind() == *kind)
                    .filter_map(workload_report),
            );
        }

        let mut pods = Vec::new();
        for pod in resources.iter().filter(|r| r.kind() == "Pod") {
            pods.push(self.pod_info(pod).await);
        }

        Ok(ApplicationReport {
            name: app.metadata.name.clone(),
            namespace: app.metadata.namespace.clone(),
            zone: self.zone.clone(),
            state: app.status.state,
            workloads,
            pods,
        })
    }

    async fn pod_info(&self, pod: &Resource) -> PodInfo {
        let (status, restarts) = pod_status(pod.value());
        let mut logs = Vec::new();
        for container in container_names(pod.value()) {
            let log = match self
                .cluster
                .pod_logs(pod.namespace(), pod.name(), &container, LOG_TAIL_LINES)
                .await
            {
                Ok(log) => log,
                Err(e) => {
                    warn!("Cannot fetch logs of {}: {}", pod.full_name(), e);
                    format!("Error fetching logs: {}", e)
                }
            };
            logs.push(LogInfo { container, log });
        }
        PodInfo {
            name: pod.name().to_string(),
            status,
            restarts,
            logs,
        }
    }

    pub async fn spec_report(&self, app: &AnyApplication) -> Result<ApplicationSpecReport> {
        let chart = self.applications.rendered_chart(app).await?;
        let mut report = ApplicationSpecReport {
            name: app.metadata.name.clone(),
            namespace: app.metadata.namespace.clone(),
            ..ApplicationSpecReport::default()
        };
        for resource in &chart.resources {
            let (pod, claims) = resource_requirements(resource);
            report.pods.extend(pod);
            report.pvcs.extend(claims);
        }
        Ok(report)
    }
}
