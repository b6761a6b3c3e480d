//! Status writes with optimistic concurrency
//!
//! Every status change of an application goes through [`StatusUpdater`]: it
//! re-reads the latest copy, applies a mutation, bumps the writing zone's
//! version and retries on version conflicts. A write that changes the global
//! fields also bumps the global version.

use crate::events::{Event, Events, GLOBAL_STATE_CHANGE_REASON, LOCAL_STATE_CHANGE_REASON};
use crate::store::ApplicationStore;
use anyapp_core::{
    AnyApplicationStatus, ApplicationConditionType, ApplicationId, ConditionStatus, GlobalState,
    Result,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Attempts before a conflict is returned to the caller
pub const MAX_CONFLICT_RETRIES: u32 = 5;
const CONFLICT_BACKOFF: Duration = Duration::from_millis(10);

pub struct StatusUpdater {
    store: Arc<dyn ApplicationStore>,
    application_id: ApplicationId,
    zone: String,
    events: Arc<dyn Events>,
}

impl StatusUpdater {
    pub fn new(
        store: Arc<dyn ApplicationStore>,
        application_id: ApplicationId,
        zone: impl Into<String>,
        events: Arc<dyn Events>,
    ) -> Self {
        Self {
            store,
            application_id,
            zone: zone.into(),
            events,
        }
    }

    /// Apply `update` to the latest status and write it when it returns an event.
    ///
    /// Returns whether a write happened. A missing application is not an error.
    pub async fn update_status<F>(&self, mut update: F) -> Result<bool>
    where
        F: FnMut(&mut AnyApplicationStatus, &str) -> Option<Event> + Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(mut app) = self.store.get(&self.application_id).await? else {
                debug!("Application {} is gone, status not written", self.application_id);
                return Ok(false);
            };

            let previous = app.status.clone();
            let Some(event) = update(&mut app.status, &self.zone) else {
                return Ok(false);
            };
            if !app.status.same_global_fields(&previous) {
                app.status.global_version = previous.global_version + 1;
            }
            app.status.get_or_create_status_for(&self.zone);
            app.increment_zone_version(&self.zone);

            match self.store.update_status(app).await {
                Ok(_) => {
                    self.events.emit(&self.application_id, &event);
                    return Ok(true);
                }
                Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                    debug!(
                        "Status conflict on {} (attempt {}), retrying",
                        self.application_id, attempt
                    );
                    tokio::time::sleep(CONFLICT_BACKOFF * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Add or update `condition` in this zone and drop `remove_types` from it.
    pub async fn update_condition(
        &self,
        event: Event,
        condition: &ConditionStatus,
        remove_types: &[ApplicationConditionType],
    ) -> Result<bool> {
        self.update_status(|status, zone| {
            let mut changed = status.add_or_update(condition, zone);
            for condition_type in remove_types {
                changed |= status.remove(*condition_type, zone);
            }
            changed.then(|| event.clone())
        })
        .await
    }
}

/// Fold a derived status into the current one.
///
/// `observed` is the status the derivation started from. Conditions of
/// `zone` that were dropped by the derivation are removed from `current`
/// unless someone rewrote them in the meantime.
///
/// Global fields are only taken when `zone` derived them as owner and
/// `current` is either unowned or still owned by `zone`.
pub fn merge_status(
    current: &mut AnyApplicationStatus,
    observed: &AnyApplicationStatus,
    new: &AnyApplicationStatus,
    zone: &str,
) -> Option<Event> {
    let mut changes = Vec::new();
    let mut conditions_changed = false;

    let owns = new.owner == zone && (current.owner.is_empty() || current.owner == zone);
    if owns {
        if let Some(placements) = &new.placements {
            if current.placements.as_ref() != Some(placements) {
                current.placements = Some(placements.clone());
                let zones: Vec<&str> = placements.iter().map(|p| p.zone.as_str()).collect();
                changes.push(format!("Placements are set to '{}'.", zones.join(", ")));
            }
        }
        if new.state != GlobalState::Unknown && new.state != current.state {
            current.state = new.state;
            changes.push(format!("Global state changed to '{}'.", new.state));
        }
        if new.owner != current.owner {
            current.owner = new.owner.clone();
            changes.push(format!("Owner changed to '{}'.", new.owner));
        }
    }

    for new_zone in &new.zones {
        let current_zone = current.get_or_create_status_for(&new_zone.zone_id);
        if !new_zone.chart_version.is_empty() && current_zone.chart_version != new_zone.chart_version {
            current_zone.chart_version = new_zone.chart_version.clone();
            conditions_changed = true;
        }
        for condition in &new_zone.conditions {
            let existing = current_zone.conditions.iter_mut().find(|c| {
                c.condition_type == condition.condition_type && c.zone_id == condition.zone_id
            });
            match existing {
                Some(existing) => {
                    if condition.last_transition_time >= existing.last_transition_time
                        && existing != condition
                    {
                        *existing = condition.clone();
                        conditions_changed = true;
                    }
                }
                None => {
                    current_zone.conditions.push(condition.clone());
                    conditions_changed = true;
                }
            }
        }
    }

    if let Some(observed_zone) = observed.status_for(zone) {
        for dropped in &observed_zone.conditions {
            if new.find_condition(zone, dropped.condition_type).is_some() {
                continue;
            }
            if let Some(current_zone) = current.status_for_mut(zone) {
                let before = current_zone.conditions.len();
                current_zone.conditions.retain(|c| {
                    !(c.condition_type == dropped.condition_type
                        && c.last_transition_time == dropped.last_transition_time)
                });
                conditions_changed |= before != current_zone.conditions.len();
            }
        }
    }

    if !changes.is_empty() {
        Some(Event {
            reason: GLOBAL_STATE_CHANGE_REASON.to_string(),
            msg: changes.join(" "),
        })
    } else if conditions_changed {
        Some(Event {
            reason: LOCAL_STATE_CHANGE_REASON.to_string(),
            msg: format!("Conditions of zone '{}' updated.", zone),
        })
    } else {
        None
    }
}
