//! Sync engine
//!
//! Bridges an `AnyApplication` to the local cluster: resolves the chart
//! version to run, renders it, applies and prunes resources, deletes versions
//! and assembles the [`GlobalApplication`] view the state machine works on.

use crate::charts::{ApplicationInstance, ChartId, ChartKey, Charts, RenderedChart};
use crate::clock::Clock;
use crate::cluster::{is_owned, Cluster};
use crate::fsm::GlobalApplication;
use crate::local::{ApplicationBundle, LocalApplication};
use anyapp_core::config::ApplicationRuntimeConfig;
use anyapp_core::resource::LABEL_CHART_VERSION;
use anyapp_core::{
    AnyAppError, AnyApplication, ChartVersion, HealthStatus, Resource, ResourceKey, Result,
    SpecificVersion,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Health of a chart version as deployed
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedStatus {
    pub health: HealthStatus,
    pub chart_version: SpecificVersion,
}

/// Outcome of one sync pass
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    pub aggregated: Option<AggregatedStatus>,
    pub application_resources_deployed: bool,
    pub application_resources_present: bool,
    pub total: usize,
    pub applied: usize,
    pub pruned: usize,
}

/// Outcome of deleting one version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteResult {
    pub version: SpecificVersion,
    pub total: usize,
    pub deleted: usize,
    pub delete_failed: usize,
    pub application_resources_present: bool,
}

impl DeleteResult {
    /// `Version v (Total=t, Deleted=d, DeleteFailed=f). `
    pub fn details(&self) -> String {
        format!(
            "Version {} (Total={}, Deleted={}, DeleteFailed={}). ",
            self.version, self.total, self.deleted, self.delete_failed
        )
    }
}

#[async_trait]
pub trait Applications: Send + Sync {
    /// Chart versions with live resources in this zone
    async fn present_versions(&self, app: &AnyApplication) -> Result<BTreeSet<SpecificVersion>>;

    /// Chart version recorded in this zone's status
    fn target_version(&self, app: &AnyApplication) -> Option<SpecificVersion>;

    /// Resolve the spec's version reference against the chart repository.
    async fn determine_target_version(&self, app: &AnyApplication) -> Result<SpecificVersion>;

    async fn load(&self, app: &AnyApplication) -> Result<GlobalApplication>;

    async fn sync_version(&self, app: &AnyApplication, version: &SpecificVersion) -> Result<SyncResult>;

    async fn delete_version(&self, app: &AnyApplication, version: &SpecificVersion) -> Result<DeleteResult>;

    /// Delete every present version, oldest first.
    async fn cleanup(&self, app: &AnyApplication) -> Result<Vec<DeleteResult>>;

    /// Chart of the recorded version, or of the resolved one when none is recorded
    async fn rendered_chart(&self, app: &AnyApplication) -> Result<RenderedChart>;

    async fn managed_resources(&self, app: &AnyApplication) -> Result<Vec<Resource>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RenderKey {
    chart_key: ChartKey,
    instance: ApplicationInstance,
}

/// [`Applications`] over a cluster backend and a chart source
pub struct ClusterApplications<C: Cluster + ?Sized = dyn Cluster, H: Charts + ?Sized = dyn Charts> {
    cluster: Arc<C>,
    charts: Arc<H>,
    runtime: ApplicationRuntimeConfig,
    clock: Arc<dyn Clock>,
    render_cache: RwLock<HashMap<RenderKey, RenderedChart>>,
}

impl<C: Cluster + ?Sized, H: Charts + ?Sized> ClusterApplications<C, H> {
    pub fn new(
        cluster: Arc<C>,
        charts: Arc<H>,
        runtime: ApplicationRuntimeConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cluster,
            charts,
            runtime,
            clock,
            render_cache: RwLock::new(HashMap::new()),
        }
    }

    async fn render_version(&self, app: &AnyApplication, version: &SpecificVersion) -> Result<RenderedChart> {
        let key = RenderKey {
            chart_key: ChartKey {
                chart_id: ChartId::for_application(app)?,
                version: version.clone(),
            },
            instance: ApplicationInstance::for_application(app),
        };
        if let Some(rendered) = self.render_cache.read().await.get(&key) {
            return Ok(rendered.clone());
        }

        let rendered = self.charts.render(&key.chart_key, &key.instance).await?;
        self.render_cache
            .write()
            .await
            .insert(key, rendered.clone());
        Ok(rendered)
    }

    async fn forget_renders(&self, app: &AnyApplication) {
        let instance_id = app.instance_id();
        self.render_cache
            .write()
            .await
            .retain(|key, _| key.instance.instance_id != instance_id);
    }

    async fn resources_by_version(&self, app: &AnyApplication) -> Result<BTreeMap<SpecificVersion, Vec<Resource>>> {
        let managed = self.cluster.list_managed(&app.instance_id()).await?;
        split_by_version(managed)
    }

    async fn version_resources(&self, app: &AnyApplication, version: &SpecificVersion) -> Result<Vec<Resource>> {
        let mut by_version = self.resources_by_version(app).await?;
        Ok(by_version.remove(version).unwrap_or_default())
    }
}

/// Group managed resources by their chart version label.
fn split_by_version(resources: Vec<Resource>) -> Result<BTreeMap<SpecificVersion, Vec<Resource>>> {
    let mut by_version: BTreeMap<SpecificVersion, Vec<Resource>> = BTreeMap::new();
    for resource in resources {
        let label = resource.label(LABEL_CHART_VERSION).ok_or_else(|| {
            AnyAppError::Sync(format!(
                "resource {} does not have version label",
                resource.full_name()
            ))
        })?;
        let version = SpecificVersion::parse(label).map_err(|e| {
            AnyAppError::Sync(format!("Failed to parse version string {}: {}", label, e))
        })?;
        by_version.entry(version).or_default().push(resource);
    }
    Ok(by_version)
}

#[async_trait]
impl<C: Cluster + ?Sized, H: Charts + ?Sized> Applications for ClusterApplications<C, H> {
    async fn present_versions(&self, app: &AnyApplication) -> Result<BTreeSet<SpecificVersion>> {
        Ok(self.resources_by_version(app).await?.into_keys().collect())
    }

    fn target_version(&self, app: &AnyApplication) -> Option<SpecificVersion> {
        let recorded = app.status.chart_version_for(&self.runtime.zone_id)?;
        match SpecificVersion::parse(recorded) {
            Ok(version) => Some(version),
            Err(e) => {
                warn!("Failed to parse chart version {} of {}: {}", recorded, app.id(), e);
                None
            }
        }
    }

    async fn determine_target_version(&self, app: &AnyApplication) -> Result<SpecificVersion> {
        let helm = app.helm().ok_or_else(|| {
            AnyAppError::InvalidInput(format!("application {} has no helm selector", app.id()))
        })?;
        let chart_version = ChartVersion::parse(&helm.version)?;
        let key = self
            .charts
            .resolve(&ChartId::for_application(app)?, &chart_version)
            .await?;
        Ok(key.version)
    }

    async fn load(&self, app: &AnyApplication) -> Result<GlobalApplication> {
        let mut local_applications = BTreeMap::new();
        for (version, resources) in self.resources_by_version(app).await? {
            let rendered = self.render_version(app, &version).await?;
            if let Some(local) = LocalApplication::load(version.clone(), resources, rendered.resources) {
                local_applications.insert(version, local);
            }
        }

        let active_version = self.target_version(app);
        let new_version = match self.determine_target_version(app).await {
            Ok(target) => match &active_version {
                Some(active) if !target.is_newer_than(active) => None,
                _ => Some(target),
            },
            Err(e) if active_version.is_some() => {
                warn!("Failed to determine target version of {}: {}", app.id(), e);
                None
            }
            Err(e) => return Err(e),
        };

        Ok(GlobalApplication::new(
            local_applications,
            active_version,
            new_version,
            app.clone(),
            self.runtime.clone(),
            self.clock.clone(),
        ))
    }

    async fn sync_version(&self, app: &AnyApplication, version: &SpecificVersion) -> Result<SyncResult> {
        let rendered = self.render_version(app, version).await?;
        let mut result = SyncResult {
            total: rendered.resources.len(),
            ..SyncResult::default()
        };

        let mut failures = Vec::new();
        for resource in &rendered.resources {
            match self.cluster.apply(resource).await {
                Ok(_) => {
                    result.applied += 1;
                    debug!("Resource synced: {}", resource.full_name());
                }
                Err(e) => failures.push(format!("{}: {}", resource.full_name(), e)),
            }
        }
        if !failures.is_empty() {
            return Err(AnyAppError::Sync(format!(
                "{} of {} resource(s) failed to apply: {}",
                failures.len(),
                result.total,
                failures.join("; ")
            )));
        }

        let expected: Vec<ResourceKey> = rendered.resources.iter().map(Resource::key).collect();
        for live in self.version_resources(app, version).await? {
            if is_owned(&live) || expected.contains(&live.key()) {
                continue;
            }
            if self.cluster.delete(&live.key()).await? {
                result.pruned += 1;
                debug!("Pruned {}", live.full_name());
            }
        }

        let live = self.version_resources(app, version).await?;
        let bundle = ApplicationBundle::new(live, rendered.resources);
        let (code, messages) = bundle.determine_state();
        result.application_resources_present = !bundle.available().is_empty();
        result.application_resources_deployed =
            result.application_resources_present && bundle.is_deployed();
        result.aggregated = Some(AggregatedStatus {
            health: HealthStatus::new(code, messages.join(". ")),
            chart_version: version.clone(),
        });
        Ok(result)
    }

    async fn delete_version(&self, app: &AnyApplication, version: &SpecificVersion) -> Result<DeleteResult> {
        let rendered = match self.render_version(app, version).await {
            Ok(rendered) => rendered.resources,
            Err(e) => {
                warn!(
                    "Cannot render {} version {}, deleting live resources only: {}",
                    app.id(),
                    version,
                    e
                );
                Vec::new()
            }
        };

        let mut live: HashMap<ResourceKey, Resource> = self
            .version_resources(app, version)
            .await?
            .into_iter()
            .map(|r| (r.key(), r))
            .collect();
        let mut result = DeleteResult {
            version: version.clone(),
            total: rendered.len(),
            deleted: 0,
            delete_failed: 0,
            application_resources_present: false,
        };

        for resource in &rendered {
            let key = resource.key();
            if !live.contains_key(&key) {
                result.deleted += 1;
                continue;
            }
            debug!("Deleting resource {}", resource.full_name());
            live.remove(&key);
            match self.cluster.delete(&key).await {
                Ok(_) => result.deleted += 1,
                Err(e) => {
                    warn!("Failed to delete {}: {}", resource.full_name(), e);
                    result.delete_failed += 1;
                }
            }
        }

        for (key, resource) in live {
            if is_owned(&resource) {
                continue;
            }
            debug!("Deleting leftover resource {}", resource.full_name());
            match self.cluster.delete(&key).await {
                Ok(_) => result.deleted += 1,
                Err(e) => {
                    warn!("Failed to delete {}: {}", resource.full_name(), e);
                    result.delete_failed += 1;
                }
            }
        }

        result.application_resources_present =
            !self.version_resources(app, version).await?.is_empty();
        Ok(result)
    }

    async fn cleanup(&self, app: &AnyApplication) -> Result<Vec<DeleteResult>> {
        let mut results = Vec::new();
        for version in self.present_versions(app).await? {
            results.push(self.delete_version(app, &version).await?);
        }
        if results.iter().all(|r| !r.application_resources_present) {
            self.forget_renders(app).await;
        }
        Ok(results)
    }

    async fn rendered_chart(&self, app: &AnyApplication) -> Result<RenderedChart> {
        let version = match self.target_version(app) {
            Some(version) => version,
            None => self.determine_target_version(app).await?,
        };
        self.render_version(app, &version).await
    }

    async fn managed_resources(&self, app: &AnyApplication) -> Result<Vec<Resource>> {
        self.cluster.list_managed(&app.instance_id()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charts::DirectoryCharts;
    use crate::clock::FakeClock;
    use crate::cluster::MemoryCluster;
    use crate::testing;
    use anyapp_core::HealthStatusCode;
    use tempfile::TempDir;

    fn applications(
        cluster: &Arc<MemoryCluster>,
        dir: &TempDir,
        zone: &str,
    ) -> ClusterApplications<MemoryCluster, DirectoryCharts> {
        ClusterApplications::new(
            cluster.clone(),
            testing::charts(dir),
            testing::runtime(zone),
            Arc::new(FakeClock::new(0)),
        )
    }

    fn version(v: &str) -> SpecificVersion {
        SpecificVersion::parse(v).unwrap()
    }

    #[tokio::test]
    async fn test_determine_target_version() {
        let dir = testing::chart_dir();
        let cluster = testing::cluster();
        let apps = applications(&cluster, &dir, "zone-a");

        let app = testing::application("web", "^1.0");
        assert_eq!(apps.determine_target_version(&app).await.unwrap(), version("1.1.0"));

        let app = testing::application("web", "1.0.0");
        assert_eq!(apps.determine_target_version(&app).await.unwrap(), version("1.0.0"));

        let app = testing::application("web", "9.9.9");
        assert!(apps.determine_target_version(&app).await.is_err());
    }

    #[tokio::test]
    async fn test_sync_version_deploys_resources() {
        let dir = testing::chart_dir();
        let cluster = testing::cluster();
        let apps = applications(&cluster, &dir, "zone-a");
        let app = testing::application("web", "1.0.0");

        let result = apps.sync_version(&app, &version("1.0.0")).await.unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.applied, 2);
        assert!(result.application_resources_present);
        assert!(result.application_resources_deployed);
        let aggregated = result.aggregated.unwrap();
        assert_eq!(aggregated.health.status, HealthStatusCode::Healthy);
        assert_eq!(aggregated.chart_version, version("1.0.0"));

        let present = apps.present_versions(&app).await.unwrap();
        assert_eq!(present.into_iter().collect::<Vec<_>>(), vec![version("1.0.0")]);
    }

    #[tokio::test]
    async fn test_sync_version_apply_failure() {
        let dir = testing::chart_dir();
        let cluster = testing::cluster();
        cluster.fail_apply("web", "admission denied").await;
        let apps = applications(&cluster, &dir, "zone-a");
        let app = testing::application("web", "1.0.0");

        let err = apps.sync_version(&app, &version("1.0.0")).await.unwrap_err();
        assert!(matches!(err, AnyAppError::Sync(_)));
        assert!(err.to_string().contains("admission denied"));
    }

    #[tokio::test]
    async fn test_sync_prunes_unrendered_resources() {
        let dir = testing::chart_dir();
        let cluster = testing::cluster();
        let apps = applications(&cluster, &dir, "zone-a");
        let app = testing::application("web", "1.0.0");
        apps.sync_version(&app, &version("1.0.0")).await.unwrap();

        let mut stray = Resource::new(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "stray", "namespace": "default"}
        }))
        .unwrap();
        stray.set_labels(&anyapp_core::resource::dcp_labels("default-web", "1.0.0"));
        cluster.apply(&stray).await.unwrap();

        let result = apps.sync_version(&app, &version("1.0.0")).await.unwrap();
        assert_eq!(result.pruned, 1);
        assert!(cluster.get(&stray.key()).await.is_none());
    }

    #[tokio::test]
    async fn test_load_global_application() {
        let dir = testing::chart_dir();
        let cluster = testing::cluster();
        let apps = applications(&cluster, &dir, "zone-a");
        let mut app = testing::application("web", "^1.0");

        let global = apps.load(&app).await.unwrap();
        assert!(!global.is_present());
        assert_eq!(global.new_version(), Some(&version("1.1.0")));
        assert_eq!(global.active_version(), None);

        apps.sync_version(&app, &version("1.0.0")).await.unwrap();
        app.status.get_or_create_status_for("zone-a").chart_version = "1.0.0".to_string();

        let global = apps.load(&app).await.unwrap();
        assert!(global.is_present());
        assert!(global.is_deployed());
        assert_eq!(global.active_version(), Some(&version("1.0.0")));
        assert_eq!(global.new_version(), Some(&version("1.1.0")));
        assert!(global.is_version_changed());
    }

    #[tokio::test]
    async fn test_load_tolerates_unreachable_chart_with_active_version() {
        let dir = testing::chart_dir();
        let cluster = testing::cluster();
        let apps = applications(&cluster, &dir, "zone-a");
        let mut app = testing::application("web", "9.9.9");

        assert!(apps.load(&app).await.is_err());

        app.status.get_or_create_status_for("zone-a").chart_version = "1.0.0".to_string();
        let global = apps.load(&app).await.unwrap();
        assert_eq!(global.new_version(), None);
    }

    #[tokio::test]
    async fn test_delete_version_and_cleanup() {
        let dir = testing::chart_dir();
        let cluster = testing::cluster();
        let apps = applications(&cluster, &dir, "zone-a");
        let app = testing::application("web", "^1.0");
        apps.sync_version(&app, &version("1.0.0")).await.unwrap();

        let result = apps.delete_version(&app, &version("1.0.0")).await.unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.deleted, 2);
        assert_eq!(result.delete_failed, 0);
        assert!(!result.application_resources_present);
        assert_eq!(
            result.details(),
            "Version 1.0.0 (Total=2, Deleted=2, DeleteFailed=0). "
        );
        assert!(cluster.is_empty().await);

        // Both versions render the same resource keys, so 1.1.0 replaces 1.0.0
        apps.sync_version(&app, &version("1.0.0")).await.unwrap();
        apps.sync_version(&app, &version("1.1.0")).await.unwrap();
        let results = apps.cleanup(&app).await.unwrap();
        let versions: Vec<String> = results.iter().map(|r| r.version.to_string()).collect();
        assert_eq!(versions, vec!["1.1.0"]);
        assert!(cluster.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_failure_is_counted() {
        let dir = testing::chart_dir();
        let cluster = testing::cluster();
        let apps = applications(&cluster, &dir, "zone-a");
        let app = testing::application("web", "1.0.0");
        apps.sync_version(&app, &version("1.0.0")).await.unwrap();
        cluster.fail_delete("web", "forbidden").await;

        let result = apps.delete_version(&app, &version("1.0.0")).await.unwrap();
        assert_eq!(result.delete_failed, 2);
        assert!(result.application_resources_present);
    }

    #[tokio::test]
    async fn test_unlabelled_resource_is_an_error() {
        let resources = vec![Resource::new(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "cfg", "labels": {}}
        }))
        .unwrap()];
        let err = split_by_version(resources).unwrap_err();
        assert!(err.to_string().contains("does not have version label"));
    }

    #[tokio::test]
    async fn test_rendered_chart_uses_recorded_version() {
        let dir = testing::chart_dir();
        let cluster = testing::cluster();
        let apps = applications(&cluster, &dir, "zone-a");
        let mut app = testing::application("web", "^1.0");

        let rendered = apps.rendered_chart(&app).await.unwrap();
        assert_eq!(rendered.key.version, version("1.1.0"));

        app.status.get_or_create_status_for("zone-a").chart_version = "1.0.0".to_string();
        let rendered = apps.rendered_chart(&app).await.unwrap();
        assert_eq!(rendered.key.version, version("1.0.0"));
        assert_eq!(rendered.resources.len(), 2);
    }
}
