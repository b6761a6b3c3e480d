//! Helm chart repositories
//!
//! Versions come from the repository `index.yaml`, fetched with reqwest and
//! cached per chart for the chart version poll interval. Rendering runs
//! `helm template` against the repository.

use super::{finalize_resources, parse_manifests, ApplicationInstance, ChartId, ChartKey, Charts, RenderedChart};
use anyapp_core::{AnyAppError, Result, SpecificVersion};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct IndexFile {
    #[serde(default)]
    entries: HashMap<String, Vec<IndexEntry>>,
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    #[serde(default)]
    version: String,
}

struct CachedVersions {
    fetched_at: Instant,
    versions: Vec<SpecificVersion>,
}

pub struct HelmCharts {
    client: reqwest::Client,
    helm_binary: String,
    ttl: Duration,
    cache: RwLock<HashMap<ChartId, CachedVersions>>,
    values_seq: AtomicU64,
}

impl HelmCharts {
    /// `ttl` is how long a fetched index stays fresh.
    pub fn new(helm_binary: impl Into<String>, ttl: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            helm_binary: helm_binary.into(),
            ttl,
            cache: RwLock::new(HashMap::new()),
            values_seq: AtomicU64::new(0),
        }
    }

    async fn fetch_versions(&self, chart_id: &ChartId) -> Result<Vec<SpecificVersion>> {
        if chart_id.repository.is_empty() {
            return Err(AnyAppError::Chart("repository URL cannot be empty".to_string()));
        }
        let url = format!("{}/index.yaml", chart_id.repository.trim_end_matches('/'));
        debug!("Fetching chart index {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            AnyAppError::Chart(format!(
                "looks like {} is not a valid chart repository or cannot be reached: {}",
                chart_id.repository, e
            ))
        })?;
        if !response.status().is_success() {
            return Err(AnyAppError::Chart(format!(
                "looks like {} is not a valid chart repository or cannot be reached: HTTP {}",
                chart_id.repository,
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| AnyAppError::Chart(format!("failed to read {}: {}", url, e)))?;
        let index: IndexFile = serde_yaml::from_str(&body)
            .map_err(|e| AnyAppError::Chart(format!("invalid index {}: {}", url, e)))?;

        let mut versions: Vec<SpecificVersion> = index
            .entries
            .get(&chart_id.chart)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| !entry.version.is_empty())
                    .filter_map(|entry| match SpecificVersion::parse(&entry.version) {
                        Ok(version) => Some(version),
                        Err(e) => {
                            warn!(
                                "Skipping version {} of chart {}: {}",
                                entry.version, chart_id.chart, e
                            );
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        versions.sort();
        versions.dedup();
        Ok(versions)
    }

    async fn write_values(&self, instance: &ApplicationInstance) -> Result<Option<std::path::PathBuf>> {
        let Some(values) = &instance.values_yaml else {
            return Ok(None);
        };
        let seq = self.values_seq.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "anyapp-values-{}-{}-{}.yaml",
            instance.instance_id,
            std::process::id(),
            seq
        ));
        tokio::fs::write(&path, values).await?;
        Ok(Some(path))
    }
}

#[async_trait]
impl Charts for HelmCharts {
    async fn available_versions(&self, chart_id: &ChartId) -> Result<Vec<SpecificVersion>> {
        let stale = {
            let cache = self.cache.read().await;
            match cache.get(chart_id) {
                Some(cached) if cached.fetched_at.elapsed() < self.ttl => {
                    return Ok(cached.versions.clone());
                }
                Some(cached) => Some(cached.versions.clone()),
                None => None,
            }
        };

        match self.fetch_versions(chart_id).await {
            Ok(versions) => {
                self.cache.write().await.insert(
                    chart_id.clone(),
                    CachedVersions {
                        fetched_at: Instant::now(),
                        versions: versions.clone(),
                    },
                );
                Ok(versions)
            }
            Err(e) => match stale {
                Some(versions) => {
                    warn!("Failed to refresh versions of {}, using cached: {}", chart_id, e);
                    Ok(versions)
                }
                None => Err(e),
            },
        }
    }

    async fn render(&self, key: &ChartKey, instance: &ApplicationInstance) -> Result<RenderedChart> {
        let version = key.version.to_string();
        let values_file = self.write_values(instance).await?;

        let mut command = Command::new(&self.helm_binary);
        command
            .arg("template")
            .arg(&instance.release_name)
            .arg(&key.chart_id.chart)
            .args(["--repo", &key.chart_id.repository])
            .args(["--version", &version])
            .args(["--namespace", &instance.namespace])
            .stdin(Stdio::null());
        if let Some(path) = &values_file {
            command.arg("-f").arg(path);
        }

        debug!(
            "Rendering {} {} for {}",
            key.chart_id, version, instance.instance_id
        );
        let output = command.output().await;
        if let Some(path) = &values_file {
            let _ = tokio::fs::remove_file(path).await;
        }
        let output = output.map_err(|e| {
            AnyAppError::Render(format!("failed to start {}: {}", self.helm_binary, e))
        })?;
        if !output.status.success() {
            return Err(AnyAppError::Render(format!(
                "Helm template failure: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let manifests = String::from_utf8_lossy(&output.stdout);
        let resources = parse_manifests(&manifests)?;
        Ok(RenderedChart {
            key: key.clone(),
            instance: instance.clone(),
            resources: finalize_resources(resources, key, instance),
        })
    }

    async fn refresh(&self) -> Result<()> {
        self.cache.write().await.clear();
        Ok(())
    }
}
