//! Per-zone step: deploy, undeploy and watch the application in this zone

use super::{running_is, GlobalApplication, NextJobs, RunningJob};
use crate::jobs::{AsyncJob, AsyncJobFactory, AsyncJobType};
use anyapp_core::{
    AnyApplicationStatus, ApplicationConditionType, DeploymentStatus, SpecificVersion,
    UndeploymentStatus,
};
use std::sync::Arc;
use tracing::{debug, info};

impl GlobalApplication {
    pub(super) fn zone_step(
        &self,
        status: &mut AnyApplicationStatus,
        running: Option<&RunningJob>,
        factory: &dyn AsyncJobFactory,
        jobs: &mut NextJobs,
    ) {
        if status.placements.is_none() {
            return;
        }
        let zone = self.zone().to_string();

        if !status.placements_contain(&zone) {
            if !self.is_present() {
                return;
            }
            let undeploy_failed = status
                .find_condition(&zone, ApplicationConditionType::Undeployment)
                .map(|c| c.is(UndeploymentStatus::Failure))
                .unwrap_or(false);
            if !running_is(running, AsyncJobType::Undeploy) && !undeploy_failed {
                info!("{} is no longer placed in zone {}", self.application.id(), zone);
                self.start_undeploy(status, factory, jobs);
            }
            return;
        }

        if let Some(job) = running {
            if matches!(
                job.job_type,
                AsyncJobType::Deploy | AsyncJobType::Undeploy | AsyncJobType::LocalPlacement
            ) {
                debug!("{} job of {} still running", job.job_type, self.application.id());
                return;
            }
        }

        let target = self.new_version.clone().or_else(|| self.active_version.clone());

        let failed_attempt = status
            .find_condition(&zone, ApplicationConditionType::Deployment)
            .filter(|c| c.is(DeploymentStatus::Failure))
            .map(|c| c.retry_attempt);
        if let Some(retry_attempt) = failed_attempt {
            let max_retries = self.application.spec.recover_strategy.max_retries;
            if retry_attempt < max_retries {
                if let Some(version) = target {
                    info!(
                        "Redeploying {} version {} (retry {} of {})",
                        self.application.id(),
                        version,
                        retry_attempt + 1,
                        max_retries
                    );
                    self.start_deploy(status, factory, jobs, &version, retry_attempt + 1);
                }
            }
            return;
        }

        if self.is_present() && self.is_version_changed() {
            self.start_undeploy(status, factory, jobs);
            if let Some(new) = &self.new_version {
                status.get_or_create_status_for(&zone).chart_version = new.to_string();
            }
            return;
        }

        if !self.is_deployed() {
            if let Some(version) = target {
                self.start_deploy(status, factory, jobs, &version, 0);
            }
            return;
        }

        if running_is(running, AsyncJobType::LocalOperation) {
            return;
        }
        let job = factory.create_operation_job(&self.application);
        if status
            .find_condition(&zone, ApplicationConditionType::Local)
            .is_none()
        {
            status.remove(ApplicationConditionType::Undeployment, &zone);
            status.add_or_update(&job.status(), &zone);
        }
        jobs.to_add = Some(job);
    }

    fn start_deploy(
        &self,
        status: &mut AnyApplicationStatus,
        factory: &dyn AsyncJobFactory,
        jobs: &mut NextJobs,
        version: &SpecificVersion,
        retry_attempt: u32,
    ) {
        let zone = self.zone().to_string();
        let job = factory.create_deploy_job(&self.application, version, retry_attempt);

        status.get_or_create_status_for(&zone);
        status.remove(ApplicationConditionType::Local, &zone);
        status.remove(ApplicationConditionType::Undeployment, &zone);
        status.add_or_update(&job.status(), &zone);
        if self.new_version.as_ref() == Some(version) {
            status.get_or_create_status_for(&zone).chart_version = version.to_string();
        }
        jobs.to_add = Some(job);
    }

    fn start_undeploy(
        &self,
        status: &mut AnyApplicationStatus,
        factory: &dyn AsyncJobFactory,
        jobs: &mut NextJobs,
    ) {
        let zone = self.zone().to_string();
        let job: Arc<dyn AsyncJob> = factory.create_undeploy_job(&self.application);

        status.remove(ApplicationConditionType::Local, &zone);
        status.remove(ApplicationConditionType::Deployment, &zone);
        status.add_or_update(&job.status(), &zone);
        jobs.to_add = Some(job);
    }
}
