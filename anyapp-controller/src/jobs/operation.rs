//! Health reporting for an application running in this zone

use super::{AsyncJob, AsyncJobType, ConditionCell, JobContext, JobId};
use crate::events::Event;
use crate::clock::Clock;
use anyapp_core::config::ApplicationRuntimeConfig;
use anyapp_core::{
    AnyApplication, ApplicationConditionType, ApplicationId, ConditionStatus, HealthStatusCode,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct LocalOperationJob {
    id: JobId,
    application_id: ApplicationId,
    zone: String,
    poll_interval: Duration,
    condition: ConditionCell,
}

/// What one health check found
enum Check {
    Report(ConditionStatus),
    /// A newer chart version is available or the application is gone
    Stop,
    Skip,
}

impl LocalOperationJob {
    pub fn new(app: &AnyApplication, runtime: &ApplicationRuntimeConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            id: JobId::new(AsyncJobType::LocalOperation, app.id()),
            application_id: app.id(),
            zone: runtime.zone_id.clone(),
            poll_interval: runtime.poll_operational_status_interval,
            condition: ConditionCell::new(
                ApplicationConditionType::Local,
                &runtime.zone_id,
                HealthStatusCode::Progressing,
                clock,
            ),
        }
    }

    async fn check(&self, ctx: &JobContext) -> Check {
        let app = match ctx.store.get(&self.application_id).await {
            Ok(Some(app)) if !app.is_being_deleted() => app,
            Ok(_) => return Check::Stop,
            Err(e) => {
                warn!("Failed to read {}: {}", self.application_id, e);
                return Check::Skip;
            }
        };
        let global = match ctx.applications.load(&app).await {
            Ok(global) => global,
            Err(e) => {
                warn!("Failed to load {}: {}", self.application_id, e);
                return Check::Skip;
            }
        };
        if global.is_version_changed() {
            info!(
                "New version {} of {} available",
                global
                    .new_version()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                self.application_id
            );
            return Check::Stop;
        }

        match global.active_local() {
            Some(local) => Check::Report(local.condition(&self.zone, ctx.clock.as_ref())),
            None => Check::Report(
                ConditionStatus::new(
                    ApplicationConditionType::Local,
                    &self.zone,
                    HealthStatusCode::Missing,
                    ctx.clock.now(),
                )
                .with_msg("Application resources are missing"),
            ),
        }
    }
}

#[async_trait]
impl AsyncJob for LocalOperationJob {
    fn job_id(&self) -> &JobId {
        &self.id
    }

    fn status(&self) -> ConditionStatus {
        self.condition.snapshot()
    }

    async fn run(&self, ctx: JobContext) {
        loop {
            match self.check(&ctx).await {
                Check::Report(condition) => {
                    self.condition
                        .set(&condition.status, "", condition.msg.clone());
                    let event = Event::local(format!(
                        "Local state changed to '{}'. {}",
                        condition.status, condition.msg
                    ));
                    ctx.write_condition(self.application_id.clone(), event, &condition, &[])
                        .await;
                }
                Check::Stop => {
                    debug!("Operation job of {} exits", self.application_id);
                    return;
                }
                Check::Skip => {}
            }
            if !ctx.sleep(self.poll_interval).await {
                return;
            }
        }
    }
}
