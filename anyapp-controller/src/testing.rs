//! Shared fixtures for unit tests

use crate::charts::DirectoryCharts;
use crate::cluster::MemoryCluster;
use anyapp_core::config::ApplicationRuntimeConfig;
use anyapp_core::{
    AnyApplication, AnyApplicationSpec, ApplicationMatcherSpec, HelmSelectorSpec, FINALIZER,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const REPOSITORY: &str = "file://charts";

pub fn manifests(version: &str) -> String {
    format!(
        r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: ${{release}}
spec:
  replicas: 1
  template:
    metadata:
      labels:
        app: ${{release}}
    spec:
      containers:
        - name: main
          image: "nginx:{version}"
---
apiVersion: v1
kind: Service
metadata:
  name: ${{release}}
spec:
  ports:
    - port: 80
"#
    )
}

pub fn write_chart(root: &Path, chart: &str, version: &str) {
    let dir = root.join(chart).join(version);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("manifests.yaml"), manifests(version)).unwrap();
}

/// Chart directory with `nginx` 1.0.0 and 1.1.0
pub fn chart_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_chart(dir.path(), "nginx", "1.0.0");
    write_chart(dir.path(), "nginx", "1.1.0");
    dir
}

pub fn charts(dir: &TempDir) -> Arc<DirectoryCharts> {
    Arc::new(DirectoryCharts::new(dir.path()))
}

pub fn cluster() -> Arc<MemoryCluster> {
    Arc::new(MemoryCluster::new().with_readiness())
}

pub fn runtime(zone: &str) -> ApplicationRuntimeConfig {
    ApplicationRuntimeConfig {
        zone_id: zone.to_string(),
        poll_operational_status_interval: Duration::from_millis(20),
        poll_sync_status_interval: Duration::from_millis(10),
        chart_version_poll_interval: Duration::from_secs(300),
        default_sync_timeout: Duration::from_secs(5),
        default_undeploy_timeout: Duration::from_secs(5),
    }
}

pub fn application(name: &str, version: &str) -> AnyApplication {
    let mut app = AnyApplication::new(
        "default",
        name,
        AnyApplicationSpec {
            application: ApplicationMatcherSpec {
                resource_selector: None,
                helm: Some(HelmSelectorSpec {
                    repository: REPOSITORY.to_string(),
                    chart: "nginx".to_string(),
                    version: version.to_string(),
                    namespace: String::new(),
                    values: None,
                }),
            },
            zones: 1,
            ..AnyApplicationSpec::default()
        },
    );
    app.add_finalizer(FINALIZER);
    app
}
