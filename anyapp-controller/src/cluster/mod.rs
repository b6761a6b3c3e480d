//! Local cluster backends
//!
//! The controller only needs four operations from the cluster it runs in:
//! list the resources it manages for an application instance, apply a
//! rendered resource, delete one, and read pod logs for reports.
//!
//! - [`MemoryCluster`] - in-memory cluster for mock mode and tests
//! - [`KubectlCluster`] - shells out to `kubectl`

mod kubectl;
mod memory;

pub use kubectl::KubectlCluster;
pub use memory::MemoryCluster;

use anyapp_core::{Resource, ResourceKey, Result};
use async_trait::async_trait;
use serde_json::Value;

/// Resource kinds that own pods
pub const WORKLOAD_KINDS: &[&str] = &["Deployment", "StatefulSet", "DaemonSet", "ReplicaSet"];

#[async_trait]
pub trait Cluster: Send + Sync {
    /// Resources labelled with the instance id, excluding cache-excluded kinds.
    async fn list_managed(&self, instance_id: &str) -> Result<Vec<Resource>>;

    /// Create or update a resource; returns the live object.
    async fn apply(&self, resource: &Resource) -> Result<Resource>;

    /// Returns false when the resource did not exist.
    async fn delete(&self, key: &ResourceKey) -> Result<bool>;

    async fn pod_logs(
        &self,
        _namespace: &str,
        _pod: &str,
        _container: &str,
        _tail: usize,
    ) -> Result<String> {
        Ok(String::new())
    }
}

/// Whether another object controls this one (pods of a ReplicaSet, ...)
pub fn is_owned(resource: &Resource) -> bool {
    resource
        .value()
        .pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .map(|owners| !owners.is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_owned() {
        let pod = Resource::new(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": "web-0",
                "ownerReferences": [{"kind": "Deployment", "name": "web"}]
            }
        }))
        .unwrap();
        assert!(is_owned(&pod));

        let service = Resource::new(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "web"}
        }))
        .unwrap();
        assert!(!is_owned(&service));
    }
}
