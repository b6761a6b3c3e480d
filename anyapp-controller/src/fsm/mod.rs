//! Application state machines
//!
//! [`GlobalApplication`] is a snapshot of one application as seen from this
//! zone: its resource and its local deployments per chart version. From it,
//! [`GlobalApplication::derive_new_status`] computes the next status and the
//! job to start. The owner zone also drives the global state; every zone
//! drives its own deployment through the zone step in [`zone`].

mod zone;

use crate::clock::Clock;
use crate::jobs::{AsyncJob, AsyncJobFactory, AsyncJobType};
use crate::local::LocalApplication;
use anyapp_core::config::ApplicationRuntimeConfig;
use anyapp_core::{
    AnyApplication, AnyApplicationStatus, ApplicationConditionType, ConditionStatus, GlobalState,
    HealthStatusCode, OwnershipTransferStatus, PlacementStatus, PlacementStrategy,
    SpecificVersion,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// The job currently running for an application
#[derive(Debug, Clone, PartialEq)]
pub struct RunningJob {
    pub job_type: AsyncJobType,
    pub condition: ConditionStatus,
}

impl RunningJob {
    pub fn of(job: &dyn AsyncJob) -> Self {
        Self {
            job_type: job.job_type(),
            condition: job.status(),
        }
    }
}

fn running_is(running: Option<&RunningJob>, job_type: AsyncJobType) -> bool {
    running.map(|job| job.job_type == job_type).unwrap_or(false)
}

#[derive(Default)]
pub struct NextJobs {
    pub to_add: Option<Arc<dyn AsyncJob>>,
}

impl fmt::Debug for NextJobs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextJobs")
            .field("to_add", &self.to_add.as_ref().map(|job| job.job_id().clone()))
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct StatusResult {
    /// `Some` only when the status differs from the application's
    pub status: Option<AnyApplicationStatus>,
    pub jobs: NextJobs,
}

pub struct GlobalApplication {
    local_applications: BTreeMap<SpecificVersion, LocalApplication>,
    active_version: Option<SpecificVersion>,
    new_version: Option<SpecificVersion>,
    application: AnyApplication,
    runtime: ApplicationRuntimeConfig,
    clock: Arc<dyn Clock>,
}

impl GlobalApplication {
    pub fn new(
        local_applications: BTreeMap<SpecificVersion, LocalApplication>,
        active_version: Option<SpecificVersion>,
        new_version: Option<SpecificVersion>,
        application: AnyApplication,
        runtime: ApplicationRuntimeConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            local_applications,
            active_version,
            new_version,
            application,
            runtime,
            clock,
        }
    }

    pub fn application(&self) -> &AnyApplication {
        &self.application
    }

    pub fn local_applications(&self) -> &BTreeMap<SpecificVersion, LocalApplication> {
        &self.local_applications
    }

    pub fn active_version(&self) -> Option<&SpecificVersion> {
        self.active_version.as_ref()
    }

    pub fn new_version(&self) -> Option<&SpecificVersion> {
        self.new_version.as_ref()
    }

    /// Some version has live resources in this zone.
    pub fn is_present(&self) -> bool {
        !self.local_applications.is_empty()
    }

    /// Deployment of the active version, or of the only present version
    /// when none is recorded
    pub fn active_local(&self) -> Option<&LocalApplication> {
        match &self.active_version {
            Some(version) => self.local_applications.get(version),
            None if self.local_applications.len() == 1 => self.local_applications.values().next(),
            None => None,
        }
    }

    pub fn is_deployed(&self) -> bool {
        self.active_local()
            .map(LocalApplication::is_deployed)
            .unwrap_or(false)
    }

    pub fn is_version_changed(&self) -> bool {
        match &self.new_version {
            Some(new) => self.active_version.as_ref() != Some(new),
            None => false,
        }
    }

    /// This zone takes part in the application: it may own it or run it.
    pub fn is_current_zone(&self) -> bool {
        let zone = self.runtime.zone_id.as_str();
        let status = &self.application.status;
        status.state == GlobalState::New
            || status.owner == zone
            || status.placements_contain(zone)
    }

    fn zone(&self) -> &str {
        &self.runtime.zone_id
    }

    /// Next status of the application and the job to start, if any.
    pub fn derive_new_status(
        &self,
        running: Option<&RunningJob>,
        factory: &dyn AsyncJobFactory,
    ) -> StatusResult {
        let zone = self.zone().to_string();
        let mut status = self.application.status.clone();
        let mut jobs = NextJobs::default();

        if status.state == GlobalState::New && status.owner.is_empty() {
            status.owner = zone.clone();
        }
        if let Some(job) = running {
            status.add_or_update(&job.condition, &zone);
        }

        if status.owner == zone {
            self.global_step(&mut status, running, factory, &mut jobs);
        } else {
            self.non_owner_step(&mut status, running, factory, &mut jobs);
        }

        let status = (status != self.application.status).then_some(status);
        StatusResult { status, jobs }
    }

    fn non_owner_step(
        &self,
        status: &mut AnyApplicationStatus,
        running: Option<&RunningJob>,
        factory: &dyn AsyncJobFactory,
        jobs: &mut NextJobs,
    ) {
        let zone = self.zone();
        let pulling = status
            .find_condition(zone, ApplicationConditionType::OwnershipTransfer)
            .map(|c| c.is(OwnershipTransferStatus::Pulling))
            .unwrap_or(false);
        if pulling {
            if !running_is(running, AsyncJobType::OwnershipTransfer) {
                jobs.to_add = Some(factory.create_ownership_transfer_job(&self.application));
            }
            return;
        }

        if status.placements_contain(zone) || self.is_present() {
            self.zone_step(status, running, factory, jobs);
        }
    }

    fn global_step(
        &self,
        status: &mut AnyApplicationStatus,
        running: Option<&RunningJob>,
        factory: &dyn AsyncJobFactory,
        jobs: &mut NextJobs,
    ) {
        let zone = self.zone();
        if status.placements.is_none() {
            status.state = match self.application.spec.placement_strategy.strategy {
                PlacementStrategy::Global => GlobalState::Placement,
                PlacementStrategy::Local => {
                    let placement = status.find_condition(zone, ApplicationConditionType::Placement);
                    match placement {
                        Some(c) if c.is(PlacementStatus::Failure) => GlobalState::Failure,
                        _ if running_is(running, AsyncJobType::LocalPlacement) => GlobalState::Placement,
                        _ => {
                            let job = factory.create_local_placement_job(&self.application);
                            status.add_or_update(&job.status(), zone);
                            jobs.to_add = Some(job);
                            GlobalState::Placement
                        }
                    }
                }
            };
            return;
        }

        self.zone_step(status, running, factory, jobs);
        status.state = self.global_state(status);
    }

    /// Global state from the conditions every zone reported
    fn global_state(&self, status: &AnyApplicationStatus) -> GlobalState {
        let failed = status.all_conditions().any(|c| {
            matches!(
                c.condition_type,
                ApplicationConditionType::Placement
                    | ApplicationConditionType::Deployment
                    | ApplicationConditionType::Undeployment
            ) && c.is("Failure")
        });
        if failed {
            return GlobalState::Failure;
        }

        let unhealthy = status
            .all_conditions()
            .filter(|c| {
                matches!(
                    c.health(),
                    Some(HealthStatusCode::Degraded) | Some(HealthStatusCode::Missing)
                )
            })
            .count();
        if unhealthy > self.application.spec.recover_strategy.tolerance as usize {
            return GlobalState::Failure;
        }

        let all_running = status.placement_zones().iter().all(|zone| {
            status
                .find_condition(zone, ApplicationConditionType::Local)
                .is_some()
        });
        if all_running {
            GlobalState::Operational
        } else {
            GlobalState::Relocation
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::jobs::{AsyncJob, AsyncJobFactory, AsyncJobType, JobContext, JobId};
    use anyapp_core::{
        AnyApplication, ApplicationConditionType, ConditionStatus, DeploymentStatus,
        HealthStatusCode, OwnershipTransferStatus, PlacementStatus, SpecificVersion,
        UndeploymentStatus,
    };
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    /// Job that reports a fixed condition and does nothing
    pub(crate) struct FakeJob {
        id: JobId,
        condition: ConditionStatus,
    }

    #[async_trait]
    impl AsyncJob for FakeJob {
        fn job_id(&self) -> &JobId {
            &self.id
        }

        fn status(&self) -> ConditionStatus {
            self.condition.clone()
        }

        async fn run(&self, _ctx: JobContext) {}
    }

    pub(crate) struct FakeJobFactory {
        pub zone: String,
    }

    impl FakeJobFactory {
        fn job(
            &self,
            app: &AnyApplication,
            job_type: AsyncJobType,
            condition_type: ApplicationConditionType,
            status: impl ToString,
        ) -> FakeJob {
            FakeJob {
                id: JobId::new(job_type, app.id()),
                condition: ConditionStatus::new(
                    condition_type,
                    self.zone.clone(),
                    status,
                    Utc.timestamp_opt(100, 0).unwrap(),
                ),
            }
        }
    }

    impl AsyncJobFactory for FakeJobFactory {
        fn create_local_placement_job(&self, app: &AnyApplication) -> Arc<dyn AsyncJob> {
            Arc::new(self.job(
                app,
                AsyncJobType::LocalPlacement,
                ApplicationConditionType::Placement,
                PlacementStatus::InProgress,
            ))
        }

        fn create_deploy_job(
            &self,
            app: &AnyApplication,
            version: &SpecificVersion,
            retry_attempt: u32,
        ) -> Arc<dyn AsyncJob> {
            let mut job = self.job(
                app,
                AsyncJobType::Deploy,
                ApplicationConditionType::Deployment,
                DeploymentStatus::Pull,
            );
            job.condition = job
                .condition
                .with_retry_attempt(retry_attempt)
                .with_msg(format!("deploying {}", version));
            Arc::new(job)
        }

        fn create_undeploy_job(&self, app: &AnyApplication) -> Arc<dyn AsyncJob> {
            Arc::new(self.job(
                app,
                AsyncJobType::Undeploy,
                ApplicationConditionType::Undeployment,
                UndeploymentStatus::Undeploy,
            ))
        }

        fn create_operation_job(&self, app: &AnyApplication) -> Arc<dyn AsyncJob> {
            Arc::new(self.job(
                app,
                AsyncJobType::LocalOperation,
                ApplicationConditionType::Local,
                HealthStatusCode::Progressing,
            ))
        }

        fn create_ownership_transfer_job(&self, app: &AnyApplication) -> Arc<dyn AsyncJob> {
            Arc::new(self.job(
                app,
                AsyncJobType::OwnershipTransfer,
                ApplicationConditionType::OwnershipTransfer,
                OwnershipTransferStatus::Pulling,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeJobFactory;
    use super::*;
    use crate::clock::FakeClock;
    use crate::testing;
    use anyapp_core::{DeploymentStatus, Placement, UndeploymentStatus};
    use chrono::{TimeZone, Utc};

    const ZONE: &str = "zone-a";

    fn version(v: &str) -> SpecificVersion {
        SpecificVersion::parse(v).unwrap()
    }

    fn condition(condition_type: ApplicationConditionType, zone: &str, status: impl ToString) -> ConditionStatus {
        ConditionStatus::new(condition_type, zone, status, Utc.timestamp_opt(50, 0).unwrap())
    }

    struct Scenario {
        app: AnyApplication,
        locals: Vec<LocalApplication>,
        active: Option<&'static str>,
        new: Option<&'static str>,
    }

    impl Scenario {
        fn new() -> Self {
            Self {
                app: testing::application("web", "^1.0"),
                locals: Vec::new(),
                active: None,
                new: Some("1.0.0"),
            }
        }

        fn owned(mut self, placements: &[&str]) -> Self {
            self.app.status.owner = ZONE.to_string();
            self.app.status.state = GlobalState::Placement;
            self.app.status.placements = Some(placements.iter().map(|z| Placement::new(*z)).collect());
            self
        }

        fn owner(mut self, owner: &str, placements: &[&str]) -> Self {
            self.app.status.owner = owner.to_string();
            self.app.status.state = GlobalState::Operational;
            self.app.status.placements = Some(placements.iter().map(|z| Placement::new(*z)).collect());
            self
        }

        fn with_condition(mut self, condition: ConditionStatus) -> Self {
            let zone = condition.zone_id.clone();
            self.app.status.add_or_update(&condition, &zone);
            self
        }

        fn with_local(mut self, local: LocalApplication) -> Self {
            self.locals.push(local);
            self
        }

        fn versions(mut self, active: Option<&'static str>, new: Option<&'static str>) -> Self {
            self.active = active;
            self.new = new;
            if let Some(active) = active {
                self.app.status.get_or_create_status_for(ZONE).chart_version = active.to_string();
            }
            self
        }

        fn global(&self) -> GlobalApplication {
            let locals = self
                .locals
                .iter()
                .map(|l| (l.version().clone(), l.clone()))
                .collect();
            GlobalApplication::new(
                locals,
                self.active.map(version),
                self.new.map(version),
                self.app.clone(),
                testing::runtime(ZONE),
                Arc::new(FakeClock::new(0)),
            )
        }

        fn derive(&self, running: Option<&RunningJob>) -> StatusResult {
            self.global().derive_new_status(
                running,
                &FakeJobFactory {
                    zone: ZONE.to_string(),
                },
            )
        }
    }

    fn job_type(result: &StatusResult) -> Option<AsyncJobType> {
        result.jobs.to_add.as_ref().map(|job| job.job_type())
    }

    fn has(status: &AnyApplicationStatus, condition_type: ApplicationConditionType, value: impl ToString) -> bool {
        status
            .find_condition(ZONE, condition_type)
            .map(|c| c.is(value))
            .unwrap_or(false)
    }

    #[test]
    fn test_helpers() {
        let scenario = Scenario::new()
            .with_local(LocalApplication::fake("1.0.0", true, HealthStatusCode::Healthy))
            .versions(Some("1.0.0"), Some("1.1.0"));
        let global = scenario.global();
        assert!(global.is_present());
        assert!(global.is_deployed());
        assert!(global.is_version_changed());
        assert_eq!(global.active_local().unwrap().version(), &version("1.0.0"));

        let nothing = Scenario::new().versions(None, None).global();
        assert!(!nothing.is_present());
        assert!(!nothing.is_deployed());
        assert!(!nothing.is_version_changed());

        // A single present version stands in for an unrecorded active one
        let untracked = Scenario::new()
            .with_local(LocalApplication::fake("1.0.0", true, HealthStatusCode::Healthy))
            .versions(None, None)
            .global();
        assert!(untracked.is_deployed());
    }

    #[test]
    fn test_new_application_is_placed_locally() {
        let result = Scenario::new().derive(None);
        let status = result.status.clone().unwrap();
        assert_eq!(status.owner, ZONE);
        assert_eq!(status.state, GlobalState::Placement);
        assert!(has(&status, ApplicationConditionType::Placement, PlacementStatus::InProgress));
        assert_eq!(job_type(&result), Some(AsyncJobType::LocalPlacement));
    }

    #[test]
    fn test_placement_in_progress_is_not_doubled() {
        let mut scenario = Scenario::new();
        scenario.app.status.owner = ZONE.to_string();
        scenario.app.status.state = GlobalState::Placement;
        let scenario = scenario.with_condition(condition(
            ApplicationConditionType::Placement,
            ZONE,
            PlacementStatus::InProgress,
        ));
        let running = RunningJob {
            job_type: AsyncJobType::LocalPlacement,
            condition: condition(ApplicationConditionType::Placement, ZONE, PlacementStatus::InProgress),
        };
        let result = scenario.derive(Some(&running));
        assert!(result.status.is_none());
        assert!(result.jobs.to_add.is_none());
    }

    #[test]
    fn test_placement_failure_fails_application() {
        let mut scenario = Scenario::new();
        scenario.app.status.owner = ZONE.to_string();
        let scenario = scenario.with_condition(condition(
            ApplicationConditionType::Placement,
            ZONE,
            PlacementStatus::Failure,
        ));
        let status = scenario.derive(None).status.unwrap();
        assert_eq!(status.state, GlobalState::Failure);
    }

    #[test]
    fn test_global_strategy_waits_for_placements() {
        let mut scenario = Scenario::new();
        scenario.app.spec.placement_strategy.strategy = PlacementStrategy::Global;
        let result = scenario.derive(None);
        let status = result.status.clone().unwrap();
        assert_eq!(status.state, GlobalState::Placement);
        assert!(status.find_condition(ZONE, ApplicationConditionType::Placement).is_none());
        assert!(result.jobs.to_add.is_none());
    }

    #[test]
    fn test_placed_zone_deploys_new_version() {
        let scenario = Scenario::new()
            .owned(&[ZONE])
            .with_condition(condition(ApplicationConditionType::Placement, ZONE, PlacementStatus::Done))
            .with_condition(condition(ApplicationConditionType::Undeployment, ZONE, UndeploymentStatus::Done));
        let result = scenario.derive(None);
        let status = result.status.clone().unwrap();

        assert_eq!(job_type(&result), Some(AsyncJobType::Deploy));
        assert!(has(&status, ApplicationConditionType::Deployment, DeploymentStatus::Pull));
        assert!(status.find_condition(ZONE, ApplicationConditionType::Undeployment).is_none());
        assert_eq!(status.chart_version_for(ZONE), Some("1.0.0"));
        assert_eq!(status.state, GlobalState::Relocation);
    }

    #[test]
    fn test_running_deploy_is_not_doubled() {
        let running = RunningJob {
            job_type: AsyncJobType::Deploy,
            condition: condition(ApplicationConditionType::Deployment, ZONE, DeploymentStatus::Pull),
        };
        let scenario = Scenario::new()
            .owned(&[ZONE])
            .versions(Some("1.0.0"), None)
            .with_condition(running.condition.clone());
        let result = scenario.derive(Some(&running));
        assert!(result.jobs.to_add.is_none());
        assert_eq!(result.status.unwrap().state, GlobalState::Relocation);
    }

    #[test]
    fn test_deployed_zone_starts_operation() {
        let scenario = Scenario::new()
            .owned(&[ZONE])
            .versions(Some("1.0.0"), None)
            .with_local(LocalApplication::fake("1.0.0", true, HealthStatusCode::Healthy))
            .with_condition(condition(ApplicationConditionType::Deployment, ZONE, DeploymentStatus::Done))
            .with_condition(condition(ApplicationConditionType::Undeployment, ZONE, UndeploymentStatus::Done));
        let result = scenario.derive(None);
        let status = result.status.clone().unwrap();

        assert_eq!(job_type(&result), Some(AsyncJobType::LocalOperation));
        assert!(has(&status, ApplicationConditionType::Local, HealthStatusCode::Progressing));
        assert!(status.find_condition(ZONE, ApplicationConditionType::Undeployment).is_none());
        assert_eq!(status.state, GlobalState::Operational);
    }

    #[test]
    fn test_operation_job_restarted_without_touching_conditions() {
        let scenario = Scenario::new()
            .owned(&[ZONE])
            .versions(Some("1.0.0"), None)
            .with_local(LocalApplication::fake("1.0.0", true, HealthStatusCode::Healthy))
            .with_condition(condition(ApplicationConditionType::Local, ZONE, HealthStatusCode::Healthy));
        let mut scenario = scenario;
        scenario.app.status.state = GlobalState::Operational;

        let result = scenario.derive(None);
        assert!(result.status.is_none());
        assert_eq!(job_type(&result), Some(AsyncJobType::LocalOperation));

        let running = RunningJob {
            job_type: AsyncJobType::LocalOperation,
            condition: condition(ApplicationConditionType::Local, ZONE, HealthStatusCode::Healthy),
        };
        let result = scenario.derive(Some(&running));
        assert!(result.status.is_none());
        assert!(result.jobs.to_add.is_none());
    }

    #[test]
    fn test_version_change_undeploys_first() {
        let scenario = Scenario::new()
            .owned(&[ZONE])
            .versions(Some("1.0.0"), Some("1.1.0"))
            .with_local(LocalApplication::fake("1.0.0", true, HealthStatusCode::Healthy))
            .with_condition(condition(ApplicationConditionType::Local, ZONE, HealthStatusCode::Healthy))
            .with_condition(condition(ApplicationConditionType::Deployment, ZONE, DeploymentStatus::Done));
        let result = scenario.derive(None);
        let status = result.status.clone().unwrap();

        assert_eq!(job_type(&result), Some(AsyncJobType::Undeploy));
        assert!(has(&status, ApplicationConditionType::Undeployment, UndeploymentStatus::Undeploy));
        assert!(status.find_condition(ZONE, ApplicationConditionType::Local).is_none());
        assert!(status.find_condition(ZONE, ApplicationConditionType::Deployment).is_none());
        assert_eq!(status.chart_version_for(ZONE), Some("1.1.0"));
        assert_eq!(status.state, GlobalState::Relocation);
    }

    #[test]
    fn test_deployment_failure_retries_within_limit() {
        let mut scenario = Scenario::new()
            .owned(&[ZONE])
            .versions(Some("1.0.0"), None)
            .with_condition(
                condition(ApplicationConditionType::Deployment, ZONE, DeploymentStatus::Failure)
                    .with_retry_attempt(1),
            );
        scenario.app.spec.recover_strategy.max_retries = 2;

        let result = scenario.derive(None);
        assert_eq!(job_type(&result), Some(AsyncJobType::Deploy));
        let status = result.status.clone().unwrap();
        let deployment = status
            .find_condition(ZONE, ApplicationConditionType::Deployment)
            .unwrap();
        assert!(deployment.is(DeploymentStatus::Pull));
        assert_eq!(deployment.retry_attempt, 2);

        let exhausted = Scenario::new()
            .owned(&[ZONE])
            .versions(Some("1.0.0"), None)
            .with_condition(
                condition(ApplicationConditionType::Deployment, ZONE, DeploymentStatus::Failure)
                    .with_retry_attempt(2),
            );
        let mut exhausted = exhausted;
        exhausted.app.spec.recover_strategy.max_retries = 2;
        let result = exhausted.derive(None);
        assert!(result.jobs.to_add.is_none());
        assert_eq!(result.status.unwrap().state, GlobalState::Failure);
    }

    #[test]
    fn test_zone_removed_from_placements_undeploys() {
        let scenario = Scenario::new()
            .owned(&["zone-b"])
            .versions(Some("1.0.0"), None)
            .with_local(LocalApplication::fake("1.0.0", true, HealthStatusCode::Healthy))
            .with_condition(condition(ApplicationConditionType::Local, ZONE, HealthStatusCode::Healthy))
            .with_condition(condition(ApplicationConditionType::Deployment, ZONE, DeploymentStatus::Done));
        let result = scenario.derive(None);
        let status = result.status.clone().unwrap();
        assert_eq!(job_type(&result), Some(AsyncJobType::Undeploy));
        assert!(has(&status, ApplicationConditionType::Undeployment, UndeploymentStatus::Undeploy));
        assert!(status.find_condition(ZONE, ApplicationConditionType::Local).is_none());
        assert_eq!(status.state, GlobalState::Relocation);

        let failed = Scenario::new()
            .owned(&["zone-b"])
            .with_local(LocalApplication::fake("1.0.0", true, HealthStatusCode::Healthy))
            .with_condition(condition(ApplicationConditionType::Undeployment, ZONE, UndeploymentStatus::Failure));
        let result = failed.derive(None);
        assert!(result.jobs.to_add.is_none());
        assert_eq!(result.status.unwrap().state, GlobalState::Failure);
    }

    #[test]
    fn test_unhealthy_zones_beyond_tolerance_fail() {
        let base = Scenario::new()
            .owned(&[ZONE, "zone-b"])
            .versions(Some("1.0.0"), None)
            .with_local(LocalApplication::fake("1.0.0", true, HealthStatusCode::Degraded))
            .with_condition(condition(ApplicationConditionType::Local, ZONE, HealthStatusCode::Degraded))
            .with_condition(condition(ApplicationConditionType::Local, "zone-b", HealthStatusCode::Healthy));

        let status = base.derive(None).status.unwrap();
        assert_eq!(status.state, GlobalState::Failure);

        let mut tolerant = base;
        tolerant.app.spec.recover_strategy.tolerance = 1;
        let status = tolerant.derive(None).status.unwrap();
        assert_eq!(status.state, GlobalState::Operational);
    }

    #[test]
    fn test_non_owner_runs_zone_step_only() {
        let scenario = Scenario::new()
            .owner("zone-b", &["zone-b", ZONE])
            .versions(None, Some("1.0.0"));
        let result = scenario.derive(None);
        let status = result.status.clone().unwrap();
        assert_eq!(job_type(&result), Some(AsyncJobType::Deploy));
        assert_eq!(status.state, GlobalState::Operational);
        assert_eq!(status.owner, "zone-b");
    }

    #[test]
    fn test_uninvolved_zone_does_nothing() {
        let scenario = Scenario::new().owner("zone-b", &["zone-b"]);
        let result = scenario.derive(None);
        assert!(result.status.is_none());
        assert!(result.jobs.to_add.is_none());
    }

    #[test]
    fn test_ownership_request_starts_transfer() {
        let scenario = Scenario::new()
            .owner("zone-b", &["zone-b", ZONE])
            .with_condition(condition(
                ApplicationConditionType::OwnershipTransfer,
                ZONE,
                OwnershipTransferStatus::Pulling,
            ));
        let result = scenario.derive(None);
        assert_eq!(job_type(&result), Some(AsyncJobType::OwnershipTransfer));
        assert!(result.status.is_none());

        let running = RunningJob {
            job_type: AsyncJobType::OwnershipTransfer,
            condition: condition(
                ApplicationConditionType::OwnershipTransfer,
                ZONE,
                OwnershipTransferStatus::Pulling,
            ),
        };
        let result = scenario.derive(Some(&running));
        assert!(result.jobs.to_add.is_none());
    }

    #[test]
    fn test_running_job_condition_is_recorded() {
        let running = RunningJob {
            job_type: AsyncJobType::Deploy,
            condition: condition(ApplicationConditionType::Deployment, ZONE, DeploymentStatus::Pull)
                .with_msg("Deployment failure: Retrying deployment (attempt 2 of 3)"),
        };
        let scenario = Scenario::new()
            .owned(&[ZONE])
            .versions(Some("1.0.0"), None)
            .with_condition(condition(ApplicationConditionType::Deployment, ZONE, DeploymentStatus::Pull));
        let status = scenario.derive(Some(&running)).status.unwrap();
        let deployment = status
            .find_condition(ZONE, ApplicationConditionType::Deployment)
            .unwrap();
        assert_eq!(deployment.msg, "Deployment failure: Retrying deployment (attempt 2 of 3)");
    }
}
