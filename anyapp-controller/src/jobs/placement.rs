//! Local placement: the owner zone places the application on itself

use super::{AsyncJob, AsyncJobType, ConditionCell, JobContext, JobId};
use crate::clock::Clock;
use crate::events::Event;
use anyapp_core::config::ApplicationRuntimeConfig;
use anyapp_core::{
    AnyApplication, ApplicationConditionType, ApplicationId, ConditionStatus, Placement,
    PlacementStatus,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

pub struct LocalPlacementJob {
    id: JobId,
    application_id: ApplicationId,
    zone: String,
    condition: ConditionCell,
}

impl LocalPlacementJob {
    pub fn new(app: &AnyApplication, runtime: &ApplicationRuntimeConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            id: JobId::new(AsyncJobType::LocalPlacement, app.id()),
            application_id: app.id(),
            zone: runtime.zone_id.clone(),
            condition: ConditionCell::new(
                ApplicationConditionType::Placement,
                &runtime.zone_id,
                PlacementStatus::InProgress,
                clock,
            ),
        }
    }
}

#[async_trait]
impl AsyncJob for LocalPlacementJob {
    fn job_id(&self) -> &JobId {
        &self.id
    }

    fn status(&self) -> ConditionStatus {
        self.condition.snapshot()
    }

    async fn run(&self, ctx: JobContext) {
        self.condition.set(PlacementStatus::Done, "", "");
        let condition = self.condition.snapshot();
        let event = Event::local(format!("Placement set to zone '{}'", self.zone));

        let result = ctx
            .status_updater(self.application_id.clone())
            .update_status(|status, zone| {
                status.placements = Some(vec![Placement::new(zone)]);
                status.add_or_update(&condition, zone);
                Some(event.clone())
            })
            .await;

        if let Err(e) = result {
            warn!("Placement of {} failed: {}", self.application_id, e);
            self.condition.set(
                PlacementStatus::Failure,
                "",
                format!("Cannot update application condition. {}", e),
            );
            let failure = self.condition.snapshot();
            ctx.write_condition(
                self.application_id.clone(),
                Event::local(failure.msg.clone()),
                &failure,
                &[],
            )
            .await;
        }
    }
}
