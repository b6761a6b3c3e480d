//! Ownership transfer: this zone becomes the application's owner

use super::{AsyncJob, AsyncJobType, ConditionCell, JobContext, JobId};
use crate::clock::Clock;
use crate::events::Event;
use anyapp_core::config::ApplicationRuntimeConfig;
use anyapp_core::{
    AnyApplication, ApplicationConditionType, ApplicationId, ConditionStatus, GlobalState,
    OwnershipTransferStatus,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

pub struct OwnershipTransferJob {
    id: JobId,
    application_id: ApplicationId,
    condition: ConditionCell,
}

impl OwnershipTransferJob {
    pub fn new(app: &AnyApplication, runtime: &ApplicationRuntimeConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            id: JobId::new(AsyncJobType::OwnershipTransfer, app.id()),
            application_id: app.id(),
            condition: ConditionCell::new(
                ApplicationConditionType::OwnershipTransfer,
                &runtime.zone_id,
                OwnershipTransferStatus::Pulling,
                clock,
            )
            .with_msg("Ownership transfer in progress"),
        }
    }
}

#[async_trait]
impl AsyncJob for OwnershipTransferJob {
    fn job_id(&self) -> &JobId {
        &self.id
    }

    fn status(&self) -> ConditionStatus {
        self.condition.snapshot()
    }

    async fn run(&self, ctx: JobContext) {
        let zone = ctx.runtime.zone_id.clone();
        self.condition.set(
            OwnershipTransferStatus::Success,
            "",
            format!("Ownership transferred to zone '{}'", zone),
        );
        let condition = self.condition.snapshot();

        let result = ctx
            .status_updater(self.application_id.clone())
            .update_status(|status, zone| {
                status.owner = zone.to_string();
                status.state = GlobalState::OwnershipTransfer;
                status.add_or_update(&condition, zone);
                Some(Event::global(format!("Owner changed to '{}'.", zone)))
            })
            .await;

        if let Err(e) = result {
            warn!("Ownership transfer of {} failed: {}", self.application_id, e);
            self.condition.set(
                OwnershipTransferStatus::Failure,
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

#[cfg(test)]
mod tests {
    use super::super::test_support::Harness;
    use super::super::AsyncJobFactory;
    use super::*;
    use crate::store::ApplicationStore;

    #[tokio::test]
    async fn test_takes_ownership() {
        let harness = Harness::new("1.0.0").await;
        let mut app = harness.latest().await;
        app.status.owner = "zone-b".to_string();
        app.status.state = GlobalState::Operational;
        harness.store.update_status(app).await.unwrap();

        let job = harness.factory().create_ownership_transfer_job(&harness.app);
        assert!(job.status().is(OwnershipTransferStatus::Pulling));
        assert_eq!(job.status().msg, "Ownership transfer in progress");

        let (ctx, _stop) = harness.context();
        job.run(ctx).await;

        let app = harness.latest().await;
        assert_eq!(app.status.owner, "zone-a");
        assert_eq!(app.status.state, GlobalState::OwnershipTransfer);
        assert!(app
            .status
            .find_condition("zone-a", ApplicationConditionType::OwnershipTransfer)
            .unwrap()
            .is(OwnershipTransferStatus::Success));
    }
}
