//! Health assessment of cluster resources
//!
//! Health is evaluated from the `status` block of unstructured Kubernetes
//! objects. Kinds without a known health policy return `None` and do not
//! influence the aggregated state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::AnyAppError;

/// Health code of a resource or an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum HealthStatusCode {
    #[default]
    Unknown,
    Progressing,
    Healthy,
    Suspended,
    Degraded,
    Missing,
}

impl HealthStatusCode {
    /// Position in the severity order, from best to worst
    fn severity(self) -> u8 {
        match self {
            HealthStatusCode::Healthy => 0,
            HealthStatusCode::Suspended => 1,
            HealthStatusCode::Progressing => 2,
            HealthStatusCode::Missing => 3,
            HealthStatusCode::Degraded => 4,
            HealthStatusCode::Unknown => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatusCode::Unknown => "Unknown",
            HealthStatusCode::Progressing => "Progressing",
            HealthStatusCode::Healthy => "Healthy",
            HealthStatusCode::Suspended => "Suspended",
            HealthStatusCode::Degraded => "Degraded",
            HealthStatusCode::Missing => "Missing",
        }
    }
}

impl fmt::Display for HealthStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatusCode {
    type Err = AnyAppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unknown" => Ok(HealthStatusCode::Unknown),
            "Progressing" => Ok(HealthStatusCode::Progressing),
            "Healthy" => Ok(HealthStatusCode::Healthy),
            "Suspended" => Ok(HealthStatusCode::Suspended),
            "Degraded" => Ok(HealthStatusCode::Degraded),
            "Missing" => Ok(HealthStatusCode::Missing),
            other => Err(AnyAppError::InvalidInput(format!(
                "unknown health status: {}",
                other
            ))),
        }
    }
}

/// Returns true when `new` is worse than `current`.
pub fn is_worse(current: HealthStatusCode, new: HealthStatusCode) -> bool {
    new.severity() > current.severity()
}

/// Health of a single resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthStatusCode,
    #[serde(default)]
    pub message: String,
}

impl HealthStatus {
    pub fn new(status: HealthStatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(HealthStatusCode::Healthy, "")
    }
}

/// Fold a set of health codes to the worst one; empty input is healthy.
pub fn aggregate<I>(codes: I) -> HealthStatusCode
where
    I: IntoIterator<Item = HealthStatusCode>,
{
    codes
        .into_iter()
        .fold(HealthStatusCode::Healthy, |acc, code| {
            if is_worse(acc, code) {
                code
            } else {
                acc
            }
        })
}

fn int_at(obj: &Value, pointer: &str) -> Option<i64> {
    obj.pointer(pointer).and_then(Value::as_i64)
}

fn str_at<'a>(obj: &'a Value, pointer: &str) -> Option<&'a str> {
    obj.pointer(pointer).and_then(Value::as_str)
}

/// Evaluate the health of an unstructured Kubernetes object.
pub fn resource_health(obj: &Value) -> Option<HealthStatus> {
    let kind = obj.get("kind").and_then(Value::as_str)?;
    match kind {
        "Deployment" => Some(deployment_health(obj)),
        "StatefulSet" => Some(statefulset_health(obj)),
        "DaemonSet" => Some(daemonset_health(obj)),
        "ReplicaSet" => Some(replicaset_health(obj)),
        "Pod" => Some(pod_health(obj)),
        "PersistentVolumeClaim" => Some(pvc_health(obj)),
        "Service" => Some(service_health(obj)),
        "Job" => Some(job_health(obj)),
        _ => None,
    }
}

fn generation_observed(obj: &Value) -> bool {
    match (
        int_at(obj, "/metadata/generation"),
        int_at(obj, "/status/observedGeneration"),
    ) {
        (Some(generation), Some(observed)) => observed >= generation,
        (Some(_), None) => false,
        _ => true,
    }
}

fn deployment_health(obj: &Value) -> HealthStatus {
    if obj.pointer("/spec/paused").and_then(Value::as_bool) == Some(true) {
        return HealthStatus::new(HealthStatusCode::Suspended, "Deployment is paused");
    }
    if !generation_observed(obj) {
        return HealthStatus::new(
            HealthStatusCode::Progressing,
            "Waiting for rollout to finish: observed deployment generation less than desired generation",
        );
    }
    let deadline_exceeded = obj
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .map(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some("Progressing")
                    && c.get("reason").and_then(Value::as_str) == Some("ProgressDeadlineExceeded")
            })
        })
        .unwrap_or(false);
    if deadline_exceeded {
        let name = str_at(obj, "/metadata/name").unwrap_or_default();
        return HealthStatus::new(
            HealthStatusCode::Degraded,
            format!("Deployment \"{}\" exceeded its progress deadline", name),
        );
    }

    let desired = int_at(obj, "/spec/replicas").unwrap_or(1);
    let updated = int_at(obj, "/status/updatedReplicas").unwrap_or(0);
    let total = int_at(obj, "/status/replicas").unwrap_or(0);
    let available = int_at(obj, "/status/availableReplicas").unwrap_or(0);

    if updated < desired {
        return HealthStatus::new(
            HealthStatusCode::Progressing,
            format!(
                "Waiting for rollout to finish: {} out of {} new replicas have been updated...",
                updated, desired
            ),
        );
    }
    if total > updated {
        return HealthStatus::new(
            HealthStatusCode::Progressing,
            format!(
                "Waiting for rollout to finish: {} old replicas are pending termination...",
                total - updated
            ),
        );
    }
    if available < updated {
        return HealthStatus::new(
            HealthStatusCode::Progressing,
            format!(
                "Waiting for rollout to finish: {} of {} updated replicas are available...",
                available, updated
            ),
        );
    }
    HealthStatus::healthy()
}

fn statefulset_health(obj: &Value) -> HealthStatus {
    if !generation_observed(obj) {
        return HealthStatus::new(
            HealthStatusCode::Progressing,
            "Waiting for statefulset spec update to be observed...",
        );
    }
    let desired = int_at(obj, "/spec/replicas").unwrap_or(1);
    let ready = int_at(obj, "/status/readyReplicas").unwrap_or(0);
    if ready < desired {
        return HealthStatus::new(
            HealthStatusCode::Progressing,
            format!(
                "Waiting for {} pods to be ready...",
                desired - ready
            ),
        );
    }
    let current = str_at(obj, "/status/currentRevision");
    let update = str_at(obj, "/status/updateRevision");
    if let (Some(current), Some(update)) = (current, update) {
        if current != update {
            return HealthStatus::new(
                HealthStatusCode::Progressing,
                "Waiting for rolling update to complete...",
            );
        }
    }
    HealthStatus::healthy()
}

fn daemonset_health(obj: &Value) -> HealthStatus {
    if !generation_observed(obj) {
        return HealthStatus::new(
            HealthStatusCode::Progressing,
            "Waiting for daemon set spec update to be observed...",
        );
    }
    let desired = int_at(obj, "/status/desiredNumberScheduled").unwrap_or(0);
    let updated = int_at(obj, "/status/updatedNumberScheduled").unwrap_or(0);
    let available = int_at(obj, "/status/numberAvailable").unwrap_or(0);
    if updated < desired {
        return HealthStatus::new(
            HealthStatusCode::Progressing,
            format!(
                "Waiting for daemon set rollout to finish: {} out of {} new pods have been updated...",
                updated, desired
            ),
        );
    }
    if available < desired {
        return HealthStatus::new(
            HealthStatusCode::Progressing,
            format!(
                "Waiting for daemon set rollout to finish: {} of {} updated pods are available...",
                available, desired
            ),
        );
    }
    HealthStatus::healthy()
}

fn replicaset_health(obj: &Value) -> HealthStatus {
    if !generation_observed(obj) {
        return HealthStatus::new(
            HealthStatusCode::Progressing,
            "Waiting for rollout to finish: observed replica set generation less than desired generation",
        );
    }
    let desired = int_at(obj, "/spec/replicas").unwrap_or(1);
    let available = int_at(obj, "/status/availableReplicas").unwrap_or(0);
    if available < desired {
        return HealthStatus::new(
            HealthStatusCode::Progressing,
            format!(
                "Waiting for rollout to finish: {} out of {} new replicas are available...",
                available, desired
            ),
        );
    }
    HealthStatus::healthy()
}

const FAILING_WAIT_REASONS: &[&str] = &[
    "CrashLoopBackOff",
    "ImagePullBackOff",
    "ErrImagePull",
    "CreateContainerConfigError",
    "InvalidImageName",
];

fn pod_health(obj: &Value) -> HealthStatus {
    let phase = str_at(obj, "/status/phase").unwrap_or("Pending");
    let statuses: Vec<&Value> = obj
        .pointer("/status/containerStatuses")
        .and_then(Value::as_array)
        .map(|a| a.iter().collect())
        .unwrap_or_default();

    for status in &statuses {
        if let Some(reason) = str_at(status, "/state/waiting/reason") {
            if FAILING_WAIT_REASONS.contains(&reason) {
                let message = str_at(status, "/state/waiting/message").unwrap_or(reason);
                return HealthStatus::new(HealthStatusCode::Degraded, message);
            }
        }
    }

    match phase {
        "Succeeded" => HealthStatus::new(
            HealthStatusCode::Healthy,
            str_at(obj, "/status/message").unwrap_or(""),
        ),
        "Failed" => HealthStatus::new(
            HealthStatusCode::Degraded,
            str_at(obj, "/status/message").unwrap_or("Pod failed"),
        ),
        "Running" => {
            let all_ready = !statuses.is_empty()
                && statuses
                    .iter()
                    .all(|s| s.get("ready").and_then(Value::as_bool) == Some(true));
            if all_ready {
                HealthStatus::healthy()
            } else {
                HealthStatus::new(HealthStatusCode::Progressing, "Waiting for containers to be ready")
            }
        }
        _ => HealthStatus::new(
            HealthStatusCode::Progressing,
            str_at(obj, "/status/message").unwrap_or(""),
        ),
    }
}

fn pvc_health(obj: &Value) -> HealthStatus {
    match str_at(obj, "/status/phase") {
        Some("Bound") => HealthStatus::healthy(),
        Some("Lost") => HealthStatus::new(HealthStatusCode::Degraded, "PVC is lost"),
        _ => HealthStatus::new(HealthStatusCode::Progressing, "PVC is not bound"),
    }
}

fn service_health(obj: &Value) -> HealthStatus {
    if str_at(obj, "/spec/type") != Some("LoadBalancer") {
        return HealthStatus::healthy();
    }
    let assigned = obj
        .pointer("/status/loadBalancer/ingress")
        .and_then(Value::as_array)
        .map(|ingress| !ingress.is_empty())
        .unwrap_or(false);
    if assigned {
        HealthStatus::healthy()
    } else {
        HealthStatus::new(
            HealthStatusCode::Progressing,
            "Waiting for load balancer ingress",
        )
    }
}

fn job_health(obj: &Value) -> HealthStatus {
    let conditions = obj
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for condition in &conditions {
        let is_true = condition.get("status").and_then(Value::as_str) == Some("True");
        if !is_true {
            continue;
        }
        let message = condition
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        match condition.get("type").and_then(Value::as_str) {
            Some("Failed") => return HealthStatus::new(HealthStatusCode::Degraded, message),
            Some("Complete") => return HealthStatus::new(HealthStatusCode::Healthy, message),
            _ => {}
        }
    }
    HealthStatus::new(HealthStatusCode::Progressing, "Job is running")
}
