//! In-memory cluster
//!
//! Stores applied objects keyed by [`ResourceKey`]. With readiness simulation
//! enabled, workloads get a ready status and one pod per replica, so that the
//! health model reports them Healthy, as a real cluster eventually would.

use super::{Cluster, WORKLOAD_KINDS};
use anyapp_core::resource::LABEL_INSTANCE_ID;
use anyapp_core::{AnyAppError, Resource, ResourceKey, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
pub struct MemoryCluster {
    resources: RwLock<BTreeMap<ResourceKey, Resource>>,
    simulate_readiness: bool,
    excludes: HashSet<String>,
    apply_failures: RwLock<HashMap<String, String>>,
    delete_failures: RwLock<HashMap<String, String>>,
    logs: RwLock<HashMap<(String, String, String), String>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill ready status and spawn pods on apply.
    pub fn with_readiness(mut self) -> Self {
        self.simulate_readiness = true;
        self
    }

    /// `group/kind` entries hidden from `list_managed`
    pub fn with_excludes(mut self, excludes: HashSet<String>) -> Self {
        self.excludes = excludes;
        self
    }

    /// Make applying resources with this name fail.
    pub async fn fail_apply(&self, name: &str, message: &str) {
        self.apply_failures
            .write()
            .await
            .insert(name.to_string(), message.to_string());
    }

    /// Make deleting resources with this name fail.
    pub async fn fail_delete(&self, name: &str, message: &str) {
        self.delete_failures
            .write()
            .await
            .insert(name.to_string(), message.to_string());
    }

    pub async fn clear_failures(&self) {
        self.apply_failures.write().await.clear();
        self.delete_failures.write().await.clear();
    }

    /// Drop a resource behind the controller's back.
    pub async fn remove(&self, key: &ResourceKey) -> bool {
        self.resources.write().await.remove(key).is_some()
    }

    /// Replace the `status` of a live resource.
    pub async fn set_status(&self, key: &ResourceKey, status: Value) -> Result<()> {
        let mut resources = self.resources.write().await;
        let resource = resources
            .get_mut(key)
            .ok_or_else(|| AnyAppError::not_found("resource", key.to_string()))?;
        if let Some(object) = resource.value_mut().as_object_mut() {
            object.insert("status".to_string(), status);
        }
        Ok(())
    }

    pub async fn set_pod_logs(&self, namespace: &str, pod: &str, container: &str, log: &str) {
        self.logs.write().await.insert(
            (namespace.to_string(), pod.to_string(), container.to_string()),
            log.to_string(),
        );
    }

    pub async fn get(&self, key: &ResourceKey) -> Option<Resource> {
        self.resources.read().await.get(key).cloned()
    }

    /// Every live resource, ordered by key
    pub async fn snapshot(&self) -> Vec<Resource> {
        self.resources.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.resources.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.resources.read().await.is_empty()
    }
}

fn int_at(value: &Value, pointer: &str) -> Option<i64> {
    value.pointer(pointer).and_then(Value::as_i64)
}

/// Status a controller would eventually report for a settled object
fn ready_status(resource: &Resource) -> Option<Value> {
    let value = resource.value();
    let generation = int_at(value, "/metadata/generation").unwrap_or(1);
    let replicas = int_at(value, "/spec/replicas").unwrap_or(1);
    match resource.kind() {
        "Deployment" | "ReplicaSet" => Some(json!({
            "observedGeneration": generation,
            "replicas": replicas,
            "updatedReplicas": replicas,
            "readyReplicas": replicas,
            "availableReplicas": replicas,
        })),
        "StatefulSet" => Some(json!({
            "observedGeneration": generation,
            "replicas": replicas,
            "readyReplicas": replicas,
            "currentReplicas": replicas,
            "updatedReplicas": replicas,
            "currentRevision": format!("{}-1", resource.name()),
            "updateRevision": format!("{}-1", resource.name()),
        })),
        "DaemonSet" => Some(json!({
            "observedGeneration": generation,
            "desiredNumberScheduled": 1,
            "currentNumberScheduled": 1,
            "updatedNumberScheduled": 1,
            "numberAvailable": 1,
            "numberReady": 1,
        })),
        "PersistentVolumeClaim" => Some(json!({"phase": "Bound"})),
        "Job" => Some(json!({
            "succeeded": 1,
            "conditions": [{"type": "Complete", "status": "True"}],
        })),
        "Service" if value.pointer("/spec/type").and_then(Value::as_str) == Some("LoadBalancer") => {
            Some(json!({"loadBalancer": {"ingress": [{"ip": "127.0.0.1"}]}}))
        }
        "Pod" => Some(running_pod_status(value.pointer("/spec"))),
        _ => None,
    }
}

fn running_pod_status(spec: Option<&Value>) -> Value {
    let statuses: Vec<Value> = spec
        .and_then(|spec| spec.get("containers"))
        .and_then(Value::as_array)
        .map(|containers| {
            containers
                .iter()
                .map(|c| {
                    json!({
                        "name": c.get("name").cloned().unwrap_or(Value::Null),
                        "ready": true,
                        "restartCount": 0,
                        "state": {"running": {}},
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    json!({"phase": "Running", "containerStatuses": statuses})
}

/// Pods a workload would run, owned by the workload
fn workload_pods(workload: &Resource) -> Vec<Resource> {
    let value = workload.value();
    let replicas = match workload.kind() {
        "DaemonSet" => 1,
        _ => int_at(value, "/spec/replicas").unwrap_or(1),
    };
    let template = value.pointer("/spec/template").cloned().unwrap_or(json!({}));
    let labels = template
        .pointer("/metadata/labels")
        .cloned()
        .unwrap_or(Value::Object(Map::new()));
    let spec = template.get("spec").cloned().unwrap_or(json!({}));

    (0..replicas.max(0))
        .filter_map(|i| {
            let mut pod = json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {
                    "name": format!("{}-{}", workload.name(), i),
                    "namespace": workload.namespace(),
                    "labels": labels,
                    "ownerReferences": [{
                        "apiVersion": workload.api_version(),
                        "kind": workload.kind(),
                        "name": workload.name(),
                    }],
                },
                "spec": spec,
            });
            pod["status"] = running_pod_status(Some(&spec));
            Resource::new(pod).ok()
        })
        .collect()
}

fn owned_by(resource: &Resource, owner: &ResourceKey) -> bool {
    resource.namespace() == owner.namespace
        && resource
            .value()
            .pointer("/metadata/ownerReferences")
            .and_then(Value::as_array)
            .map(|refs| {
                refs.iter().any(|r| {
                    r.get("kind").and_then(Value::as_str) == Some(owner.kind.as_str())
                        && r.get("name").and_then(Value::as_str) == Some(owner.name.as_str())
                })
            })
            .unwrap_or(false)
}

#[async_trait]
impl Cluster for MemoryCluster {
    async fn list_managed(&self, instance_id: &str) -> Result<Vec<Resource>> {
        let resources = self.resources.read().await;
        Ok(resources
            .iter()
            .filter(|(key, resource)| {
                resource.label(LABEL_INSTANCE_ID) == Some(instance_id)
                    && !self.excludes.contains(&key.group_kind())
            })
            .map(|(_, resource)| resource.clone())
            .collect())
    }

    async fn apply(&self, resource: &Resource) -> Result<Resource> {
        if let Some(message) = self.apply_failures.read().await.get(resource.name()) {
            return Err(AnyAppError::Cluster(format!(
                "failed to apply {}: {}",
                resource.full_name(),
                message
            )));
        }

        let key = resource.key();
        let mut resources = self.resources.write().await;
        let mut live = resource.clone();

        let generation = match resources.get(&key) {
            Some(existing) => {
                let previous = int_at(existing.value(), "/metadata/generation").unwrap_or(1);
                if existing.value().get("spec") != resource.value().get("spec") {
                    previous + 1
                } else {
                    previous
                }
            }
            None => 1,
        };
        if let Some(metadata) = live.value_mut().get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert("generation".to_string(), json!(generation));
        }

        if self.simulate_readiness {
            if let Some(status) = ready_status(&live) {
                if let Some(object) = live.value_mut().as_object_mut() {
                    object.insert("status".to_string(), status);
                }
            }
            if WORKLOAD_KINDS.contains(&live.kind()) && live.kind() != "ReplicaSet" {
                resources.retain(|_, r| !owned_by(r, &key));
                for pod in workload_pods(&live) {
                    resources.insert(pod.key(), pod);
                }
            }
        } else if let Some(existing_status) = resources.get(&key).and_then(|r| r.value().get("status")).cloned() {
            if let Some(object) = live.value_mut().as_object_mut() {
                object.insert("status".to_string(), existing_status);
            }
        }

        debug!("Applied {}", key);
        resources.insert(key, live.clone());
        Ok(live)
    }

    async fn delete(&self, key: &ResourceKey) -> Result<bool> {
        if let Some(message) = self.delete_failures.read().await.get(&key.name) {
            return Err(AnyAppError::Cluster(format!(
                "failed to delete {}: {}",
                key, message
            )));
        }
        let mut resources = self.resources.write().await;
        let removed = resources.remove(key).is_some();
        if removed {
            resources.retain(|_, r| !owned_by(r, key));
            debug!("Deleted {}", key);
        }
        Ok(removed)
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, container: &str, tail: usize) -> Result<String> {
        let logs = self.logs.read().await;
        let Some(log) = logs.get(&(namespace.to_string(), pod.to_string(), container.to_string())) else {
            return Ok(String::new());
        };
        let lines: Vec<&str> = log.lines().collect();
        let start = lines.len().saturating_sub(tail);
        Ok(lines[start..].join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyapp_core::health::resource_health;
    use anyapp_core::resource::dcp_labels;
    use anyapp_core::HealthStatusCode;

    fn deployment(name: &str, replicas: i64) -> Resource {
        let mut resource = Resource::new(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": name, "namespace": "default"},
            "spec": {
                "replicas": replicas,
                "template": {
                    "metadata": {"labels": {"app": name}},
                    "spec": {"containers": [{"name": "main", "image": "nginx"}]}
                }
            }
        }))
        .unwrap();
        resource.set_labels(&dcp_labels("default-web", "1.0.0"));
        resource
    }

    #[tokio::test]
    async fn test_apply_and_list_managed() {
        let cluster = MemoryCluster::new();
        cluster.apply(&deployment("web", 1)).await.unwrap();

        let managed = cluster.list_managed("default-web").await.unwrap();
        assert_eq!(managed.len(), 1);
        assert!(cluster.list_managed("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_readiness_simulation_makes_workloads_healthy() {
        let cluster = MemoryCluster::new().with_readiness();
        let live = cluster.apply(&deployment("web", 2)).await.unwrap();
        let health = resource_health(live.value()).unwrap();
        assert_eq!(health.status, HealthStatusCode::Healthy);

        let managed = cluster.list_managed("default-web").await.unwrap();
        let pods: Vec<_> = managed.iter().filter(|r| r.kind() == "Pod").collect();
        assert_eq!(pods.len(), 2);
        assert_eq!(pods[0].name(), "web-0");
        assert!(super::super::is_owned(pods[0]));
    }

    #[tokio::test]
    async fn test_without_readiness_workload_progresses() {
        let cluster = MemoryCluster::new();
        let live = cluster.apply(&deployment("web", 1)).await.unwrap();
        let health = resource_health(live.value()).unwrap();
        assert_eq!(health.status, HealthStatusCode::Progressing);
    }

    #[tokio::test]
    async fn test_delete_cascades_to_pods() {
        let cluster = MemoryCluster::new().with_readiness();
        let live = cluster.apply(&deployment("web", 3)).await.unwrap();
        assert_eq!(cluster.len().await, 4);

        assert!(cluster.delete(&live.key()).await.unwrap());
        assert!(cluster.is_empty().await);
        assert!(!cluster.delete(&live.key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_reapply_bumps_generation_on_spec_change() {
        let cluster = MemoryCluster::new();
        cluster.apply(&deployment("web", 1)).await.unwrap();
        let same = cluster.apply(&deployment("web", 1)).await.unwrap();
        assert_eq!(same.value()["metadata"]["generation"], 1);
        let scaled = cluster.apply(&deployment("web", 2)).await.unwrap();
        assert_eq!(scaled.value()["metadata"]["generation"], 2);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let cluster = MemoryCluster::new();
        cluster.fail_apply("web", "quota exceeded").await;
        let err = cluster.apply(&deployment("web", 1)).await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));

        cluster.clear_failures().await;
        let live = cluster.apply(&deployment("web", 1)).await.unwrap();
        cluster.fail_delete("web", "forbidden").await;
        assert!(cluster.delete(&live.key()).await.is_err());
    }

    #[tokio::test]
    async fn test_excludes_hide_kinds() {
        let excludes = HashSet::from(["apps/Deployment".to_string()]);
        let cluster = MemoryCluster::new().with_excludes(excludes);
        cluster.apply(&deployment("web", 1)).await.unwrap();
        assert!(cluster.list_managed("default-web").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pod_logs_tail() {
        let cluster = MemoryCluster::new();
        cluster
            .set_pod_logs("default", "web-0", "main", "one\ntwo\nthree")
            .await;
        assert_eq!(
            cluster.pod_logs("default", "web-0", "main", 2).await.unwrap(),
            "two\nthree"
        );
        assert_eq!(cluster.pod_logs("default", "web-1", "main", 2).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_set_status_and_remove() {
        let cluster = MemoryCluster::new();
        let live = cluster.apply(&deployment("web", 1)).await.unwrap();
        cluster
            .set_status(&live.key(), json!({"observedGeneration": 1}))
            .await
            .unwrap();
        let fetched = cluster.get(&live.key()).await.unwrap();
        assert_eq!(fetched.value()["status"]["observedGeneration"], 1);

        assert!(cluster.remove(&live.key()).await);
        assert!(cluster.get(&live.key()).await.is_none());
    }
}
