//! Cluster backend driving `kubectl`

use super::Cluster;
use anyapp_core::resource::LABEL_INSTANCE_ID;
use anyapp_core::{AnyAppError, Resource, ResourceKey, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Kinds fetched when listing the resources of an instance
const LISTED_KINDS: &str = "all,pvc,configmap,secret,serviceaccount,ingress";

pub struct KubectlCluster {
    binary: String,
    excludes: HashSet<String>,
}

impl KubectlCluster {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            excludes: HashSet::new(),
        }
    }

    pub fn with_excludes(mut self, excludes: HashSet<String>) -> Self {
        self.excludes = excludes;
        self
    }

    async fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<String> {
        debug!("Running {} {}", self.binary, args.join(" "));
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = command.spawn().map_err(|e| {
            AnyAppError::Cluster(format!("failed to start {}: {}", self.binary, e))
        })?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
            drop(pipe);
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnyAppError::Cluster(format!(
                "{} {} failed: {}",
                self.binary,
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// `kind.group` as accepted by kubectl
fn resource_type(key: &ResourceKey) -> String {
    if key.group.is_empty() {
        key.kind.to_lowercase()
    } else {
        format!("{}.{}", key.kind.to_lowercase(), key.group)
    }
}

fn parse_list(output: &str) -> Result<Vec<Resource>> {
    let list: Value = serde_json::from_str(output)?;
    let items = list
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    items.into_iter().map(Resource::new).collect()
}

#[async_trait]
impl Cluster for KubectlCluster {
    async fn list_managed(&self, instance_id: &str) -> Result<Vec<Resource>> {
        let selector = format!("{}={}", LABEL_INSTANCE_ID, instance_id);
        let output = self
            .run(
                &["get", LISTED_KINDS, "-A", "-l", &selector, "-o", "json"],
                None,
            )
            .await?;
        let resources = parse_list(&output)?;
        Ok(resources
            .into_iter()
            .filter(|r| !self.excludes.contains(&r.key().group_kind()))
            .collect())
    }

    async fn apply(&self, resource: &Resource) -> Result<Resource> {
        let manifest = serde_json::to_vec(resource.value())?;
        let output = self
            .run(&["apply", "-f", "-", "-o", "json"], Some(&manifest))
            .await?;
        let live: Value = serde_json::from_str(&output)?;
        Resource::new(live)
    }

    async fn delete(&self, key: &ResourceKey) -> Result<bool> {
        let resource_type = resource_type(key);
        let mut args = vec!["delete", resource_type.as_str(), key.name.as_str()];
        if !key.namespace.is_empty() {
            args.extend(["-n", key.namespace.as_str()]);
        }
        args.extend(["--ignore-not-found", "--wait=false", "-o", "name"]);
        let output = self.run(&args, None).await?;
        Ok(!output.trim().is_empty())
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, container: &str, tail: usize) -> Result<String> {
        let tail = format!("--tail={}", tail);
        match self
            .run(&["logs", pod, "-n", namespace, "-c", container, &tail], None)
            .await
        {
            Ok(logs) => Ok(logs),
            Err(e) => {
                warn!("Cannot read logs of {}/{}: {}", namespace, pod, e);
                Ok(String::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type() {
        let key = ResourceKey {
            group: "apps".to_string(),
            kind: "Deployment".to_string(),
            namespace: "default".to_string(),
            name: "web".to_string(),
        };
        assert_eq!(resource_type(&key), "deployment.apps");

        let core = ResourceKey {
            group: String::new(),
            kind: "ConfigMap".to_string(),
            namespace: "default".to_string(),
            name: "cfg".to_string(),
        };
        assert_eq!(resource_type(&core), "configmap");
    }

    #[test]
    fn test_parse_list() {
        let output = r#"{"apiVersion":"v1","kind":"List","items":[
            {"apiVersion":"v1","kind":"Service","metadata":{"name":"web","namespace":"default"}}
        ]}"#;
        let resources = parse_list(output).unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].kind(), "Service");
    }

    #[tokio::test]
    async fn test_missing_binary_is_cluster_error() {
        let cluster = KubectlCluster::new("/nonexistent/kubectl-binary");
        let result = cluster.list_managed("default-web").await;
        assert!(matches!(result, Err(AnyAppError::Cluster(_))));
    }
}
