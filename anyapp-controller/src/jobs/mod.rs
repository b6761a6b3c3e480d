//! Asynchronous jobs
//!
//! Long-running work the state machine hands off: placing an application,
//! deploying or undeploying a chart version, watching an operational
//! application and taking over ownership. At most one job runs per
//! application; starting a new one replaces the current one.
//!
//! - [`placement`] - local placement decision
//! - [`deploy`] - sync a chart version until it is deployed
//! - [`undeploy`] - delete every present version
//! - [`operation`] - report local health of a deployed application
//! - [`ownership`] - take ownership of an application

pub mod deploy;
pub mod operation;
pub mod ownership;
pub mod placement;
pub mod undeploy;

pub use deploy::DeployJob;
pub use operation::LocalOperationJob;
pub use ownership::OwnershipTransferJob;
pub use placement::LocalPlacementJob;
pub use undeploy::UndeployJob;

use crate::applications::Applications;
use crate::clock::Clock;
use crate::events::{Event, Events};
use crate::status::StatusUpdater;
use crate::store::ApplicationStore;
use anyapp_core::config::ApplicationRuntimeConfig;
use anyapp_core::{
    AnyApplication, ApplicationConditionType, ApplicationId, ConditionStatus, SpecificVersion,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Attempts deploy and undeploy jobs make before giving up
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AsyncJobType {
    LocalPlacement,
    Deploy,
    Undeploy,
    LocalOperation,
    OwnershipTransfer,
}

impl fmt::Display for AsyncJobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AsyncJobType::LocalPlacement => "LocalPlacement",
            AsyncJobType::Deploy => "Deploy",
            AsyncJobType::Undeploy => "Undeploy",
            AsyncJobType::LocalOperation => "LocalOperation",
            AsyncJobType::OwnershipTransfer => "OwnershipTransfer",
        };
        f.write_str(name)
    }
}

static NEXT_JOB_SEQ: AtomicU64 = AtomicU64::new(1);

/// Identity of one job instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId {
    pub job_type: AsyncJobType,
    pub application_id: ApplicationId,
    /// Unique per process, tells two jobs of the same type apart
    pub seq: u64,
}

impl JobId {
    pub fn new(job_type: AsyncJobType, application_id: ApplicationId) -> Self {
        Self {
            job_type,
            application_id,
            seq: NEXT_JOB_SEQ.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} {}", self.job_type, self.seq, self.application_id)
    }
}

#[async_trait]
pub trait AsyncJob: Send + Sync {
    fn job_id(&self) -> &JobId;

    fn job_type(&self) -> AsyncJobType {
        self.job_id().job_type
    }

    /// Condition the job currently reports for its zone
    fn status(&self) -> ConditionStatus;

    /// Run to completion or until the context is cancelled.
    async fn run(&self, ctx: JobContext);
}

/// Everything a running job may touch
#[derive(Clone)]
pub struct JobContext {
    pub store: Arc<dyn ApplicationStore>,
    pub applications: Arc<dyn Applications>,
    pub events: Arc<dyn Events>,
    pub clock: Arc<dyn Clock>,
    pub runtime: ApplicationRuntimeConfig,
    cancel: watch::Receiver<bool>,
}

impl JobContext {
    /// Context whose cancellation is driven by the returned sender.
    ///
    /// Dropping the sender cancels the context.
    pub fn new(
        store: Arc<dyn ApplicationStore>,
        applications: Arc<dyn Applications>,
        events: Arc<dyn Events>,
        clock: Arc<dyn Clock>,
        runtime: ApplicationRuntimeConfig,
    ) -> (Self, watch::Sender<bool>) {
        let (stop, cancel) = watch::channel(false);
        let ctx = Self {
            store,
            applications,
            events,
            clock,
            runtime,
            cancel,
        };
        (ctx, stop)
    }

    /// Same services with a fresh cancellation signal
    pub fn child(&self) -> (Self, watch::Sender<bool>) {
        let (stop, cancel) = watch::channel(false);
        let ctx = Self {
            cancel,
            ..self.clone()
        };
        (ctx, stop)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow() || self.cancel.has_changed().is_err()
    }

    /// Sleep for `duration`; false when the job was stopped meanwhile.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let mut cancel = self.cancel.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_cancelled(),
            _ = cancel.changed() => false,
        }
    }

    pub(crate) fn status_updater(&self, application_id: ApplicationId) -> StatusUpdater {
        StatusUpdater::new(
            self.store.clone(),
            application_id,
            self.runtime.zone_id.clone(),
            self.events.clone(),
        )
    }

    /// Write a job condition, logging failures.
    pub(crate) async fn write_condition(
        &self,
        application_id: ApplicationId,
        event: Event,
        condition: &ConditionStatus,
        remove_types: &[ApplicationConditionType],
    ) {
        let updater = self.status_updater(application_id.clone());
        if let Err(e) = updater.update_condition(event, condition, remove_types).await {
            error!("Failed to update status of {}: {}", application_id, e);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ConditionState {
    status: String,
    reason: String,
    msg: String,
}

/// Mutable condition a job reports while it runs
pub(crate) struct ConditionCell {
    condition_type: ApplicationConditionType,
    zone: String,
    retry_attempt: u32,
    clock: Arc<dyn Clock>,
    state: Mutex<ConditionState>,
}

impl ConditionCell {
    pub(crate) fn new(
        condition_type: ApplicationConditionType,
        zone: impl Into<String>,
        status: impl ToString,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            condition_type,
            zone: zone.into(),
            retry_attempt: 0,
            clock,
            state: Mutex::new(ConditionState {
                status: status.to_string(),
                reason: String::new(),
                msg: String::new(),
            }),
        }
    }

    pub(crate) fn with_msg(self, msg: impl Into<String>) -> Self {
        lock(&self.state).msg = msg.into();
        self
    }

    pub(crate) fn with_retry_attempt(mut self, retry_attempt: u32) -> Self {
        self.retry_attempt = retry_attempt;
        self
    }

    pub(crate) fn set(&self, status: impl ToString, reason: impl Into<String>, msg: impl Into<String>) {
        let mut state = lock(&self.state);
        state.status = status.to_string();
        state.reason = reason.into();
        state.msg = msg.into();
    }

    /// Keep the status, replace reason and message.
    pub(crate) fn set_msg(&self, reason: impl Into<String>, msg: impl Into<String>) {
        let mut state = lock(&self.state);
        state.reason = reason.into();
        state.msg = msg.into();
    }

    pub(crate) fn msg(&self) -> String {
        lock(&self.state).msg.clone()
    }

    pub(crate) fn snapshot(&self) -> ConditionStatus {
        let state = lock(&self.state);
        ConditionStatus::new(
            self.condition_type,
            self.zone.clone(),
            &state.status,
            self.clock.now(),
        )
        .with_reason(state.reason.clone())
        .with_msg(state.msg.clone())
        .with_retry_attempt(self.retry_attempt)
    }
}

struct Worker {
    job: Arc<dyn AsyncJob>,
    // Dropping the sender cancels the job
    stop: watch::Sender<bool>,
}

/// Registry of running jobs, one per application
pub struct Jobs {
    context: JobContext,
    workers: Arc<Mutex<HashMap<ApplicationId, Worker>>>,
}

impl Jobs {
    pub fn new(context: JobContext) -> Self {
        Self {
            context,
            workers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn `job`, replacing the application's current job.
    pub fn execute(&self, job: Arc<dyn AsyncJob>) {
        let job_id = job.job_id().clone();
        let (ctx, stop) = self.context.child();
        let workers = self.workers.clone();
        let runner = job.clone();

        let mut guard = lock(&self.workers);
        if let Some(previous) = guard.remove(&job_id.application_id) {
            debug!("Replacing job {} with {}", previous.job.job_id(), job_id);
        }
        let spawned_id = job_id.clone();
        tokio::spawn(async move {
            info!("Job {} started", spawned_id);
            runner.run(ctx).await;
            info!("Job {} finished", spawned_id);

            let mut workers = lock(&workers);
            let current = workers
                .get(&spawned_id.application_id)
                .map(|w| w.job.job_id().seq);
            if current == Some(spawned_id.seq) {
                workers.remove(&spawned_id.application_id);
            }
        });
        guard.insert(job_id.application_id, Worker { job, stop });
    }

    pub fn current(&self, application_id: &ApplicationId) -> Option<Arc<dyn AsyncJob>> {
        lock(&self.workers)
            .get(application_id)
            .map(|worker| worker.job.clone())
    }

    /// Cancel the application's job; returns whether one was running.
    pub fn stop(&self, application_id: &ApplicationId) -> bool {
        match lock(&self.workers).remove(application_id) {
            Some(worker) => {
                let _ = worker.stop.send(true);
                debug!("Stopped job {}", worker.job.job_id());
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let mut workers = lock(&self.workers);
        for (_, worker) in workers.drain() {
            let _ = worker.stop.send(true);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.workers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait AsyncJobFactory: Send + Sync {
    fn create_local_placement_job(&self, app: &AnyApplication) -> Arc<dyn AsyncJob>;

    fn create_deploy_job(
        &self,
        app: &AnyApplication,
        version: &SpecificVersion,
        retry_attempt: u32,
    ) -> Arc<dyn AsyncJob>;

    fn create_undeploy_job(&self, app: &AnyApplication) -> Arc<dyn AsyncJob>;

    fn create_operation_job(&self, app: &AnyApplication) -> Arc<dyn AsyncJob>;

    fn create_ownership_transfer_job(&self, app: &AnyApplication) -> Arc<dyn AsyncJob>;
}

pub struct DefaultJobFactory {
    runtime: ApplicationRuntimeConfig,
    clock: Arc<dyn Clock>,
}

impl DefaultJobFactory {
    pub fn new(runtime: ApplicationRuntimeConfig, clock: Arc<dyn Clock>) -> Self {
        Self { runtime, clock }
    }
}

impl AsyncJobFactory for DefaultJobFactory {
    fn create_local_placement_job(&self, app: &AnyApplication) -> Arc<dyn AsyncJob> {
        Arc::new(LocalPlacementJob::new(app, &self.runtime, self.clock.clone()))
    }

    fn create_deploy_job(
        &self,
        app: &AnyApplication,
        version: &SpecificVersion,
        retry_attempt: u32,
    ) -> Arc<dyn AsyncJob> {
        Arc::new(DeployJob::new(
            app,
            version.clone(),
            retry_attempt,
            &self.runtime,
            self.clock.clone(),
        ))
    }

    fn create_undeploy_job(&self, app: &AnyApplication) -> Arc<dyn AsyncJob> {
        Arc::new(UndeployJob::new(app, &self.runtime, self.clock.clone()))
    }

    fn create_operation_job(&self, app: &AnyApplication) -> Arc<dyn AsyncJob> {
        Arc::new(LocalOperationJob::new(app, &self.runtime, self.clock.clone()))
    }

    fn create_ownership_transfer_job(&self, app: &AnyApplication) -> Arc<dyn AsyncJob> {
        Arc::new(OwnershipTransferJob::new(app, &self.runtime, self.clock.clone()))
    }
}
