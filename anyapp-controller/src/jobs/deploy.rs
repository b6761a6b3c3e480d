//! Deploy a chart version and wait until its resources are in place

use super::{lock, AsyncJob, AsyncJobType, ConditionCell, JobContext, JobId, MAX_ATTEMPTS};
use crate::clock::{elapsed, Clock};
use crate::events::Event;
use anyapp_core::config::duration::format_duration;
use anyapp_core::config::ApplicationRuntimeConfig;
use anyapp_core::{
    get_sync_timeout, AnyApplication, ApplicationConditionType, ConditionStatus, DeploymentStatus,
    SpecificVersion,
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

pub struct DeployJob {
    id: JobId,
    application: AnyApplication,
    version: SpecificVersion,
    poll_interval: Duration,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    condition: ConditionCell,
    attempt: Mutex<Attempt>,
}

impl DeployJob {
    pub fn new(
        app: &AnyApplication,
        version: SpecificVersion,
        retry_attempt: u32,
        runtime: &ApplicationRuntimeConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let timeout = get_sync_timeout(
            &app.spec.sync_policy.sync_options,
            runtime.default_sync_timeout,
        );
        Self {
            id: JobId::new(AsyncJobType::Deploy, app.id()),
            application: app.clone(),
            version,
            poll_interval: runtime.poll_sync_status_interval,
            timeout,
            attempt: Mutex::new(Attempt {
                number: 1,
                started: clock.now(),
            }),
            condition: ConditionCell::new(
                ApplicationConditionType::Deployment,
                &runtime.zone_id,
                DeploymentStatus::Pull,
                clock.clone(),
            )
            .with_retry_attempt(retry_attempt),
            clock,
        }
    }

    pub fn version(&self) -> &SpecificVersion {
        &self.version
    }

    /// One sync pass; true when the job is finished.
    async fn sync_cycle(&self, ctx: &JobContext) -> bool {
        let result = ctx
            .applications
            .sync_version(&self.application, &self.version)
            .await;

        match result {
            Err(e) => {
                self.condition.set(
                    DeploymentStatus::Failure,
                    "SyncError",
                    format!("Deployment failure: {}", e),
                );
                self.write(ctx).await;
                true
            }
            Ok(result) if result.application_resources_deployed => {
                self.condition.set(
                    DeploymentStatus::Done,
                    "",
                    format!("Deployment state changed to '{}'. ", DeploymentStatus::Done),
                );
                self.write(ctx).await;
                true
            }
            Ok(result) => {
                debug!(
                    "Deployment of {} version {} in progress ({}/{} applied)",
                    self.application.id(),
                    self.version,
                    result.applied,
                    result.total
                );
                self.check_timeout(ctx).await
            }
        }
    }

    async fn check_timeout(&self, ctx: &JobContext) -> bool {
        let now = self.clock.now();
        let next_attempt = {
            let mut attempt = lock(&self.attempt);
            if elapsed(attempt.started, now) <= self.timeout {
                return false;
            }
            if attempt.number >= MAX_ATTEMPTS {
                None
            } else {
                attempt.number += 1;
                attempt.started = now;
                Some(attempt.number)
            }
        };

        match next_attempt {
            Some(number) => {
                info!(
                    "Retrying deployment of {} (attempt {} of {})",
                    self.application.id(),
                    number,
                    MAX_ATTEMPTS
                );
                self.condition.set(
                    DeploymentStatus::Pull,
                    "Timeout",
                    format!(
                        "Deployment failure: Retrying deployment (attempt {} of {})",
                        number, MAX_ATTEMPTS
                    ),
                );
                self.write(ctx).await;
                false
            }
            None => {
                self.condition.set(
                    DeploymentStatus::Failure,
                    "Timeout",
                    format!(
                        "Deployment failure: Deployment timed out after {}",
                        format_duration(&self.timeout)
                    ),
                );
                self.write(ctx).await;
                true
            }
        }
    }

    async fn write(&self, ctx: &JobContext) {
        let condition = self.condition.snapshot();
        ctx.write_condition(
            self.application.id(),
            Event::local(condition.msg.clone()),
            &condition,
            &[
                ApplicationConditionType::Undeployment,
                ApplicationConditionType::Local,
            ],
        )
        .await;
    }
}

#[async_trait]
impl AsyncJob for DeployJob {
    fn job_id(&self) -> &JobId {
        &self.id
    }

    fn status(&self) -> ConditionStatus {
        self.condition.snapshot()
    }

    async fn run(&self, ctx: JobContext) {
        loop {
            if self.sync_cycle(&ctx).await {
                return;
            }
            if !ctx.sleep(self.poll_interval).await {
                debug!("Deployment of {} stopped", self.application.id());
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Harness;
    use super::*;
    use crate::cluster::MemoryCluster;
    use anyapp_core::UndeploymentStatus;
    use std::collections::HashSet;

    fn deploy_job(harness: &Harness, version: &str) -> DeployJob {
        DeployJob::new(
            &harness.app,
            SpecificVersion::parse(version).unwrap(),
            0,
            &harness.runtime,
            harness.clock.clone(),
        )
    }

    #[tokio::test]
    async fn test_deploy_succeeds() {
        let harness = Harness::new("1.0.0").await;
        let undeployment = ConditionStatus::new(
            ApplicationConditionType::Undeployment,
            "zone-a",
            UndeploymentStatus::Done,
            harness.clock.now(),
        );
        let (ctx, _stop) = harness.context();
        ctx.write_condition(harness.app.id(), Event::local("seed"), &undeployment, &[])
            .await;

        let job = deploy_job(&harness, "1.0.0");
        assert!(job.status().is(DeploymentStatus::Pull));
        job.run(ctx).await;

        let condition = harness
            .condition(ApplicationConditionType::Deployment)
            .await
            .unwrap();
        assert!(condition.is(DeploymentStatus::Done));
        assert_eq!(condition.msg, "Deployment state changed to 'Done'. ");
        assert!(harness
            .condition(ApplicationConditionType::Undeployment)
            .await
            .is_none());
        assert!(!harness.cluster.is_empty().await);
    }

    #[tokio::test]
    async fn test_sync_error_fails_immediately() {
        let cluster = crate::testing::cluster();
        cluster.fail_apply("web", "quota exceeded").await;
        let harness = Harness::with_cluster("1.0.0", cluster).await;
        let job = deploy_job(&harness, "1.0.0");
        let (ctx, _stop) = harness.context();
        job.run(ctx).await;

        let condition = harness
            .condition(ApplicationConditionType::Deployment)
            .await
            .unwrap();
        assert!(condition.is(DeploymentStatus::Failure));
        assert_eq!(condition.reason, "SyncError");
        assert!(condition.msg.starts_with("Deployment failure: "));
        assert!(condition.msg.contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_timeout_retries_then_fails() {
        // Services are hidden from listings, so the deployment never completes
        let cluster = Arc::new(
            MemoryCluster::new()
                .with_readiness()
                .with_excludes(HashSet::from(["/Service".to_string()])),
        );
        let mut harness = Harness::with_cluster("1.0.0", cluster).await;
        harness.runtime.default_sync_timeout = Duration::from_millis(30);
        let job = deploy_job(&harness, "1.0.0");
        let (ctx, _stop) = harness.context();

        tokio::time::timeout(Duration::from_secs(5), job.run(ctx))
            .await
            .expect("deploy job should give up");

        let condition = harness
            .condition(ApplicationConditionType::Deployment)
            .await
            .unwrap();
        assert!(condition.is(DeploymentStatus::Failure));
        assert_eq!(condition.reason, "Timeout");
        assert_eq!(condition.msg, "Deployment failure: Deployment timed out after 30ms");

        let messages: Vec<String> = harness
            .events
            .events_for(&harness.app.id())
            .into_iter()
            .map(|e| e.msg)
            .collect();
        assert!(messages.contains(&"Deployment failure: Retrying deployment (attempt 2 of 3)".to_string()));
        assert!(messages.contains(&"Deployment failure: Retrying deployment (attempt 3 of 3)".to_string()));
    }

    #[tokio::test]
    async fn test_sync_timeout_option_and_retry_attempt() {
        let mut harness = Harness::new("1.0.0").await;
        harness.app.spec.sync_policy.sync_options = vec!["syncTimeout=2m".to_string()];
        let job = DeployJob::new(
            &harness.app,
            SpecificVersion::parse("1.0.0").unwrap(),
            2,
            &harness.runtime,
            harness.clock.clone(),
        );
        assert_eq!(job.timeout, Duration::from_secs(120));
        assert_eq!(job.status().retry_attempt, 2);
        assert_eq!(job.version().to_string(), "1.0.0");
    }

    #[tokio::test]
    async fn test_stopped_job_returns() {
        let cluster = Arc::new(
            MemoryCluster::new().with_excludes(HashSet::from(["/Service".to_string()])),
        );
        let harness = Harness::with_cluster("1.0.0", cluster).await;
        let job = deploy_job(&harness, "1.0.0");
        let (ctx, stop) = harness.context();
        let handle = tokio::spawn(async move { job.run(ctx).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("job should stop")
            .unwrap();
    }
}
