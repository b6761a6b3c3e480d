//! Remove every chart version of an application from this zone

use super::{lock, AsyncJob, AsyncJobType, ConditionCell, JobContext, JobId, MAX_ATTEMPTS};
use crate::applications::DeleteResult;
use crate::clock::{elapsed, Clock};
use crate::events::Event;
use anyapp_core::config::ApplicationRuntimeConfig;
use anyapp_core::{
    AnyApplication, ApplicationConditionType, ConditionStatus, UndeploymentStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

struct Attempt {
    number: u32,
    started: DateTime<Utc>,
}

pub struct UndeployJob {
    id: JobId,
    application: AnyApplication,
    poll_interval: Duration,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    condition: ConditionCell,
    attempt: Mutex<Attempt>,
}

fn format_delete_results(results: &[DeleteResult]) -> String {
    results.iter().map(DeleteResult::details).collect()
}

impl UndeployJob {
    pub fn new(app: &AnyApplication, runtime: &ApplicationRuntimeConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            id: JobId::new(AsyncJobType::Undeploy, app.id()),
            application: app.clone(),
            poll_interval: runtime.poll_sync_status_interval,
            timeout: runtime.default_undeploy_timeout,
            attempt: Mutex::new(Attempt {
                number: 1,
                started: clock.now(),
            }),
            condition: ConditionCell::new(
                ApplicationConditionType::Undeployment,
                &runtime.zone_id,
                UndeploymentStatus::Undeploy,
                clock.clone(),
            ),
            clock,
        }
    }

    /// One cleanup pass; true when the job is finished.
    async fn cycle(&self, ctx: &JobContext) -> bool {
        let versions = match ctx.applications.present_versions(&self.application).await {
            Ok(versions) => versions,
            Err(e) => {
                return self
                    .maybe_retry(ctx, "SyncError", &format!("Undeployment failed: {}", e))
                    .await
            }
        };
        if versions.is_empty() {
            self.success(ctx, "No versions found, undeployment is complete")
                .await;
            return true;
        }

        let results = match ctx.applications.cleanup(&self.application).await {
            Ok(results) => results,
            Err(e) => {
                return self
                    .maybe_retry(ctx, "SyncError", &format!("Undeployment failed: {}", e))
                    .await
            }
        };
        let details = format_delete_results(&results);
        if results.iter().all(|r| !r.application_resources_present) {
            self.success(ctx, &details).await;
            return true;
        }

        let started = lock(&self.attempt).started;
        if elapsed(started, self.clock.now()) > self.timeout {
            return self.maybe_retry(ctx, "Timeout", "Undeployment timed out").await;
        }

        debug!("Undeployment of {} in progress: {}", self.application.id(), details);
        self.condition.set_msg("", details);
        self.write(ctx).await;
        false
    }

    /// Count a failed attempt; true when attempts are exhausted.
    async fn maybe_retry(&self, ctx: &JobContext, reason: &str, failure: &str) -> bool {
        let next_attempt = {
            let mut attempt = lock(&self.attempt);
            if attempt.number < MAX_ATTEMPTS {
                attempt.number += 1;
                attempt.started = self.clock.now();
                Some(attempt.number)
            } else {
                None
            }
        };

        match next_attempt {
            Some(number) => {
                info!(
                    "Retrying undeployment of {} (attempt {} of {})",
                    self.application.id(),
                    number,
                    MAX_ATTEMPTS
                );
                self.condition.set(
                    UndeploymentStatus::Undeploy,
                    reason,
                    format!(
                        "Undeploy failure: {} Retrying undeployment (attempt {} of {}).",
                        failure, number, MAX_ATTEMPTS
                    ),
                );
                self.write(ctx).await;
                false
            }
            None => {
                self.condition.set(
                    UndeploymentStatus::Failure,
                    reason,
                    format!("Undeploy failure: Failure after {} attempts.", MAX_ATTEMPTS),
                );
                self.write(ctx).await;
                true
            }
        }
    }

    async fn success(&self, ctx: &JobContext, details: &str) {
        self.condition.set(
            UndeploymentStatus::Done,
            "",
            format!(
                "Undeploy state changed to '{}'.{}",
                UndeploymentStatus::Done,
                details
            ),
        );
        self.write(ctx).await;
    }

    async fn write(&self, ctx: &JobContext) {
        let condition = self.condition.snapshot();
        ctx.write_condition(
            self.application.id(),
            Event::local(self.condition.msg()),
            &condition,
            &[
                ApplicationConditionType::Local,
                ApplicationConditionType::Deployment,
            ],
        )
        .await;
    }
}

#[async_trait]
impl AsyncJob for UndeployJob {
    fn job_id(&self) -> &JobId {
        &self.id
    }

    fn status(&self) -> ConditionStatus {
        self.condition.snapshot()
    }

    async fn run(&self, ctx: JobContext) {
        loop {
            if self.cycle(&ctx).await {
                return;
            }
            if !ctx.sleep(self.poll_interval).await {
                debug!("Undeployment of {} stopped", self.application.id());
                return;
            }
        }
    }
}
