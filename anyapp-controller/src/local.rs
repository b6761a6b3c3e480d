//! State of one chart version deployed in this zone

use crate::clock::Clock;
use anyapp_core::health::{aggregate, resource_health, HealthStatus};
use anyapp_core::{
    ApplicationConditionType, ConditionStatus, HealthStatusCode, Resource, ResourceKey,
    SpecificVersion,
};
use std::collections::HashMap;
use tracing::debug;

/// Live resources of an instance next to the resources its chart renders
#[derive(Debug, Clone, Default)]
pub struct ApplicationBundle {
    available: Vec<Resource>,
    expected: Vec<Resource>,
}

impl ApplicationBundle {
    pub fn new(available: Vec<Resource>, expected: Vec<Resource>) -> Self {
        Self {
            available,
            expected,
        }
    }

    /// Available resources by key; later duplicates are ignored.
    fn available_by_key(&self) -> HashMap<ResourceKey, &Resource> {
        let mut map = HashMap::new();
        for resource in &self.available {
            let key = resource.key();
            if map.contains_key(&key) {
                debug!("Duplicate resource found: {}", key);
                continue;
            }
            map.insert(key, resource);
        }
        map
    }

    /// Every expected resource exists.
    pub fn is_deployed(&self) -> bool {
        let available = self.available_by_key();
        self.expected.iter().all(|expected| {
            let present = available.contains_key(&expected.key());
            if !present {
                debug!("Resource is missing: {}", expected.key());
            }
            present
        })
    }

    /// Worst health over the expected resources, with the non-empty messages.
    pub fn determine_state(&self) -> (HealthStatusCode, Vec<String>) {
        let available = self.available_by_key();
        let statuses: Vec<HealthStatus> = self
            .expected
            .iter()
            .filter_map(|expected| {
                let key = expected.key();
                match available.get(&key) {
                    Some(live) => resource_health(live.value()),
                    None => Some(HealthStatus::new(
                        HealthStatusCode::Missing,
                        format!(
                            "Resource is missing: {} {}/{}",
                            key.group_kind(),
                            key.namespace,
                            key.name
                        ),
                    )),
                }
            })
            .collect();

        let code = aggregate(statuses.iter().map(|s| s.status));
        let messages = statuses
            .into_iter()
            .filter(|s| !s.message.is_empty())
            .map(|s| s.message)
            .collect();
        (code, messages)
    }

    pub fn available(&self) -> &[Resource] {
        &self.available
    }

    pub fn expected(&self) -> &[Resource] {
        &self.expected
    }
}

/// A chart version with live resources in this zone
#[derive(Debug, Clone)]
pub struct LocalApplication {
    version: SpecificVersion,
    bundle: ApplicationBundle,
    status: HealthStatusCode,
    messages: Vec<String>,
}

impl LocalApplication {
    /// `None` when nothing of this version runs in the zone.
    pub fn load(
        version: SpecificVersion,
        available: Vec<Resource>,
        expected: Vec<Resource>,
    ) -> Option<Self> {
        if available.is_empty() {
            return None;
        }
        let bundle = ApplicationBundle::new(available, expected);
        let (status, messages) = bundle.determine_state();
        Some(Self {
            version,
            bundle,
            status,
            messages,
        })
    }

    pub fn version(&self) -> &SpecificVersion {
        &self.version
    }

    pub fn is_deployed(&self) -> bool {
        self.bundle.is_deployed()
    }

    pub fn status(&self) -> HealthStatusCode {
        self.status
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn bundle(&self) -> &ApplicationBundle {
        &self.bundle
    }

    /// `Local` condition for this zone
    pub fn condition(&self, zone: &str, clock: &dyn Clock) -> ConditionStatus {
        ConditionStatus::new(ApplicationConditionType::Local, zone, self.status, clock.now())
            .with_msg(self.messages.join(" "))
    }

    #[cfg(test)]
    pub(crate) fn fake(version: &str, deployed: bool, status: HealthStatusCode) -> Self {
        use serde_json::json;
        let config_map = |name: &str| {
            Resource::new(json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": name, "namespace": "default"}
            }))
            .expect("valid resource")
        };
        let mut expected = vec![config_map("present")];
        if !deployed {
            expected.push(config_map("missing"));
        }
        Self {
            version: SpecificVersion::parse(version).expect("valid version"),
            bundle: ApplicationBundle::new(vec![config_map("present")], expected),
            status,
            messages: Vec::new(),
        }
    }
}
