//! Observed state of an application: global state, placements and per-zone conditions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::health::HealthStatusCode;

/// Declares a string-backed status enum with `as_str`, `Display` and `FromStr`.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant)),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::AnyAppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($variant) => Ok($name::$variant),)+
                    other => Err($crate::error::AnyAppError::InvalidInput(format!(
                        concat!("invalid ", stringify!($name), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

string_enum!(
    /// Global state of an application, driven by the owner zone
    GlobalState {
        Unknown,
        New,
        Placement,
        Operational,
        Relocation,
        Failure,
        OwnershipTransfer,
    }
);

impl Default for GlobalState {
    fn default() -> Self {
        GlobalState::New
    }
}

string_enum!(
    /// Kind of condition recorded per zone
    ApplicationConditionType {
        Local,
        Placement,
        OwnershipTransfer,
        Deployment,
        Undeployment,
    }
);

string_enum!(PlacementStatus { InProgress, Done, Failure });
string_enum!(DeploymentStatus { Pull, Done, Failure });
string_enum!(UndeploymentStatus { Undeploy, Done, Failure });
string_enum!(OwnershipTransferStatus { Pulling, Failure, Success });

/// A zone chosen to run the application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub zone: String,
    #[serde(rename = "node-affinity", default, skip_serializing_if = "Vec::is_empty")]
    pub node_affinity: Vec<String>,
}

impl Placement {
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            node_affinity: Vec::new(),
        }
    }
}

/// A single condition reported by a zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionStatus {
    #[serde(rename = "type")]
    pub condition_type: ApplicationConditionType,
    pub zone_id: String,
    pub status: String,
    pub last_transition_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub msg: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retry_attempt: u32,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl ConditionStatus {
    pub fn new(
        condition_type: ApplicationConditionType,
        zone_id: impl Into<String>,
        status: impl ToString,
        last_transition_time: DateTime<Utc>,
    ) -> Self {
        Self {
            condition_type,
            zone_id: zone_id.into(),
            status: status.to_string(),
            last_transition_time,
            reason: String::new(),
            msg: String::new(),
            retry_attempt: 0,
        }
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = msg.into();
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_retry_attempt(mut self, retry_attempt: u32) -> Self {
        self.retry_attempt = retry_attempt;
        self
    }

    /// True when the condition's status equals `status`
    pub fn is(&self, status: impl ToString) -> bool {
        self.status == status.to_string()
    }

    /// Health code of a `Local` condition
    pub fn health(&self) -> Option<HealthStatusCode> {
        if self.condition_type != ApplicationConditionType::Local {
            return None;
        }
        self.status.parse().ok()
    }
}

/// Status reported by one zone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneStatus {
    pub zone_id: String,
    #[serde(rename = "version", default)]
    pub zone_version: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chart_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionStatus>,
}

impl ZoneStatus {
    pub fn new(zone_id: impl Into<String>) -> Self {
        Self {
            zone_id: zone_id.into(),
            ..Self::default()
        }
    }

    pub fn find_condition(&self, condition_type: ApplicationConditionType) -> Option<&ConditionStatus> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    pub fn empty_conditions(&self) -> bool {
        self.conditions.is_empty()
    }
}

/// Observed state of an application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnyApplicationStatus {
    #[serde(default)]
    pub state: GlobalState,
    #[serde(default)]
    pub owner: String,
    /// `None` until placement has been decided
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placements: Option<Vec<Placement>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<ZoneStatus>,
    /// Bumped on every change of state, owner or placements
    #[serde(rename = "globalVersion", default)]
    pub global_version: i64,
}

impl AnyApplicationStatus {
    /// State, owner and placements are equal.
    pub fn same_global_fields(&self, other: &Self) -> bool {
        self.state == other.state
            && self.owner == other.owner
            && self.placements == other.placements
    }

    /// Whether this copy's global fields supersede `other`'s.
    ///
    /// Copies are ordered by global version; two claims at the same version
    /// are ordered by owner, the lexicographically smaller zone winning. A
    /// copy without an owner never supersedes one with an owner.
    pub fn global_fields_supersede(&self, other: &Self) -> bool {
        if self.owner.is_empty() {
            return false;
        }
        if other.owner.is_empty() {
            return true;
        }
        match self.global_version.cmp(&other.global_version) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.owner < other.owner,
        }
    }

    /// Take state, owner, placements and global version from `other`.
    pub fn copy_global_fields(&mut self, other: &Self) {
        self.state = other.state;
        self.owner = other.owner.clone();
        self.placements = other.placements.clone();
        self.global_version = other.global_version;
    }

    pub fn status_for(&self, zone: &str) -> Option<&ZoneStatus> {
        self.zones.iter().find(|z| z.zone_id == zone)
    }

    pub fn status_for_mut(&mut self, zone: &str) -> Option<&mut ZoneStatus> {
        self.zones.iter_mut().find(|z| z.zone_id == zone)
    }

    /// New zones start at version 0 with no conditions.
    pub fn get_or_create_status_for(&mut self, zone: &str) -> &mut ZoneStatus {
        let index = match self.zones.iter().position(|z| z.zone_id == zone) {
            Some(index) => index,
            None => {
                self.zones.push(ZoneStatus::new(zone));
                self.zones.len() - 1
            }
        };
        &mut self.zones[index]
    }

    pub fn remove_zone(&mut self, zone: &str) {
        self.zones.retain(|z| z.zone_id != zone);
    }

    pub fn zone_exists(&self, zone: &str) -> bool {
        self.status_for(zone).is_some()
    }

    /// Insert or replace a condition in the zone's list.
    ///
    /// Replacing returns true only when status, reason or msg differ; a
    /// replacement that only changes the timestamp is dropped.
    pub fn add_or_update(&mut self, condition: &ConditionStatus, zone: &str) -> bool {
        let zone_status = self.get_or_create_status_for(zone);
        let existing = zone_status.conditions.iter().position(|c| {
            c.condition_type == condition.condition_type && c.zone_id == condition.zone_id
        });
        match existing {
            Some(index) => {
                let current = &mut zone_status.conditions[index];
                if current.status != condition.status
                    || current.reason != condition.reason
                    || current.msg != condition.msg
                {
                    *current = condition.clone();
                    true
                } else {
                    false
                }
            }
            None => {
                zone_status.conditions.push(condition.clone());
                true
            }
        }
    }

    /// Returns true when a condition was removed.
    pub fn remove(&mut self, condition_type: ApplicationConditionType, zone: &str) -> bool {
        let Some(zone_status) = self.status_for_mut(zone) else {
            return false;
        };
        let before = zone_status.conditions.len();
        zone_status
            .conditions
            .retain(|c| !(c.condition_type == condition_type && c.zone_id == zone));
        before != zone_status.conditions.len()
    }

    pub fn find_condition(
        &self,
        zone: &str,
        condition_type: ApplicationConditionType,
    ) -> Option<&ConditionStatus> {
        self.status_for(zone)
            .and_then(|z| z.find_condition(condition_type))
    }

    pub fn all_conditions(&self) -> impl Iterator<Item = &ConditionStatus> {
        self.zones.iter().flat_map(|z| z.conditions.iter())
    }

    pub fn placements_contain(&self, zone: &str) -> bool {
        self.placements
            .as_ref()
            .map(|placements| placements.iter().any(|p| p.zone == zone))
            .unwrap_or(false)
    }

    /// Zones listed in placements, in order
    pub fn placement_zones(&self) -> Vec<String> {
        self.placements
            .as_ref()
            .map(|placements| placements.iter().map(|p| p.zone.clone()).collect())
            .unwrap_or_default()
    }

    /// Chart version recorded by a zone, if any
    pub fn chart_version_for(&self, zone: &str) -> Option<&str> {
        self.status_for(zone)
            .map(|z| z.chart_version.as_str())
            .filter(|v| !v.is_empty())
    }
}
