//! Zone daemon configuration, loaded once at startup from YAML

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::duration::parse_duration;
use crate::error::{AnyAppError, Result};

/// Timing and identity of this zone's controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationRuntimeConfig {
    /// Identifier of the zone this daemon runs in
    #[serde(rename = "zone")]
    pub zone_id: String,
    /// Interval between health checks of an operational application
    #[serde(rename = "operationalPollDuration", with = "super::duration")]
    pub poll_operational_status_interval: Duration,
    /// Interval between sync cycles of deploy/undeploy jobs
    #[serde(rename = "syncPollDuration", with = "super::duration")]
    pub poll_sync_status_interval: Duration,
    /// How long a chart repository index stays cached
    #[serde(rename = "chartVersionPollDuration", with = "super::duration")]
    pub chart_version_poll_interval: Duration,
    #[serde(rename = "defaultSyncTimeout", with = "super::duration")]
    pub default_sync_timeout: Duration,
    #[serde(rename = "defaultUndeployTimeout", with = "super::duration")]
    pub default_undeploy_timeout: Duration,
}

impl Default for ApplicationRuntimeConfig {
    fn default() -> Self {
        Self {
            zone_id: "default".to_string(),
            poll_operational_status_interval: Duration::from_secs(10),
            poll_sync_status_interval: Duration::from_secs(2),
            chart_version_poll_interval: Duration::from_secs(300),
            default_sync_timeout: Duration::from_secs(300),
            default_undeploy_timeout: Duration::from_secs(120),
        }
    }
}

/// REST API settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind_address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8090".to_string(),
        }
    }
}

/// Resource kinds ignored when listing managed resources
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// `group/kind` entries, e.g. `apps/ReplicaSet` or `/Event`
    pub excludes: Vec<String>,
}

impl CacheConfig {
    pub fn excludes_set(&self) -> HashSet<String> {
        self.excludes.iter().cloned().collect()
    }

    pub fn is_excluded(&self, group: &str, kind: &str) -> bool {
        let key = format!("{}/{}", group, kind);
        self.excludes.iter().any(|e| *e == key)
    }
}

/// Log levels per component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub default_level: String,
    /// Target (module path) to level
    pub components: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            components: BTreeMap::new(),
        }
    }
}

/// Level names accepted in [`LoggingConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

impl LoggingConfig {
    /// `debug|info|warn|error|none`; anything else is `info`.
    pub fn parse_level(level: &str) -> LogLevel {
        match level {
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            "none" => LogLevel::Off,
            _ => LogLevel::Info,
        }
    }

    /// Filter directives in `EnvFilter` syntax, e.g. `info,anyapp_controller::jobs=debug`
    pub fn filter_directives(&self) -> String {
        let mut directives = vec![Self::parse_level(&self.default_level)
            .as_directive()
            .to_string()];
        for (component, level) in &self.components {
            directives.push(format!(
                "{}={}",
                component,
                Self::parse_level(level).as_directive()
            ));
        }
        directives.join(",")
    }
}

/// Another zone's daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub url: String,
}

/// Status exchange with peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerSyncConfig {
    #[serde(with = "super::duration")]
    pub interval: Duration,
    #[serde(with = "super::duration")]
    pub timeout: Duration,
}

impl Default for PeerSyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Application store persistence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// YAML file holding all applications; in-memory only when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

/// Chart source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartsConfig {
    /// Local chart directory (`<dir>/<chart>/<version>/*.yaml`); Helm otherwise
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    pub helm_binary: String,
}

impl Default for ChartsConfig {
    fn default() -> Self {
        Self {
            directory: None,
            helm_binary: "helm".to_string(),
        }
    }
}

/// Cluster access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub kubectl_binary: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kubectl_binary: "kubectl".to_string(),
        }
    }
}

/// Complete configuration of a zone daemon.
///
/// Every section is optional in the file and falls back to its defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub runtime: ApplicationRuntimeConfig,
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub peers: Vec<PeerConfig>,
    pub peer_sync: PeerSyncConfig,
    pub store: StoreConfig,
    pub charts: ChartsConfig,
    pub cluster: ClusterConfig,
}

impl Config {
    /// Parse Config from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| AnyAppError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Serialize Config to a YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| AnyAppError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AnyAppError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.runtime.zone_id.trim().is_empty() {
            return Err(AnyAppError::Config("runtime.zone must not be empty".to_string()));
        }
        let intervals = [
            ("operationalPollDuration", self.runtime.poll_operational_status_interval),
            ("syncPollDuration", self.runtime.poll_sync_status_interval),
            ("chartVersionPollDuration", self.runtime.chart_version_poll_interval),
            ("peer_sync.interval", self.peer_sync.interval),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(AnyAppError::Config(format!("{} must be positive", name)));
            }
        }
        if let Some(peer) = self.peers.iter().find(|p| p.url.trim().is_empty()) {
            return Err(AnyAppError::Config(format!(
                "peer url must not be empty: {:?}",
                peer
            )));
        }
        Ok(())
    }
}

/// Sync timeout from `syncTimeout=<duration>` in the sync options, else `default`.
pub fn get_sync_timeout(sync_options: &[String], default: Duration) -> Duration {
    parse_key_value_pairs(sync_options)
        .get("syncTimeout")
        .and_then(|value| parse_duration(value).ok())
        .unwrap_or(default)
}

/// `key=value` pairs; entries without `=` map to an empty value.
fn parse_key_value_pairs(pairs: &[String]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.clone(), String::new()),
        })
        .collect()
}
