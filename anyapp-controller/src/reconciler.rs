//! Reconcile loop
//!
//! [`Reconciler`] brings one application closer to its desired state: it
//! handles the finalizer, loads the zone's view, derives the next status and
//! starts the job the state machine asks for. [`Controller`] feeds it from
//! store events and a periodic resync.

use crate::applications::Applications;
use crate::events::Events;
use crate::fsm::RunningJob;
use crate::jobs::{AsyncJobFactory, Jobs};
use crate::status::{merge_status, StatusUpdater};
use crate::store::ApplicationStore;
use anyapp_core::config::ApplicationRuntimeConfig;
use anyapp_core::{ApplicationId, Result, FINALIZER};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Delay before retrying a failed reconcile
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Done,
    Requeue(Duration),
}

pub struct Reconciler {
    store: Arc<dyn ApplicationStore>,
    applications: Arc<dyn Applications>,
    jobs: Arc<Jobs>,
    factory: Arc<dyn AsyncJobFactory>,
    events: Arc<dyn Events>,
    runtime: ApplicationRuntimeConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ApplicationStore>,
        applications: Arc<dyn Applications>,
        jobs: Arc<Jobs>,
        factory: Arc<dyn AsyncJobFactory>,
        events: Arc<dyn Events>,
        runtime: ApplicationRuntimeConfig,
    ) -> Self {
        Self {
            store,
            applications,
            jobs,
            factory,
            events,
            runtime,
        }
    }

    pub fn jobs(&self) -> &Arc<Jobs> {
        &self.jobs
    }

    pub async fn reconcile(&self, id: &ApplicationId) -> Result<ReconcileOutcome> {
        let Some(mut app) = self.store.get(id).await? else {
            debug!("Application {} is gone", id);
            self.jobs.stop(id);
            return Ok(ReconcileOutcome::Done);
        };

        if app.is_being_deleted() {
            self.jobs.stop(id);
            if !app.has_finalizer(FINALIZER) {
                return Ok(ReconcileOutcome::Done);
            }
            if let Err(e) = self.applications.cleanup(&app).await {
                warn!("Cleanup of {} failed: {}", id, e);
                return Ok(ReconcileOutcome::Requeue(RETRY_DELAY));
            }
            if !self.applications.present_versions(&app).await?.is_empty() {
                debug!("Resources of {} still present", id);
                return Ok(ReconcileOutcome::Requeue(RETRY_DELAY));
            }
            app.remove_finalizer(FINALIZER);
            self.store.update(app).await?;
            info!("Application {} removed from zone {}", id, self.runtime.zone_id);
            return Ok(ReconcileOutcome::Done);
        }

        if app.add_finalizer(FINALIZER) {
            self.store.update(app).await?;
            return Ok(ReconcileOutcome::Requeue(Duration::ZERO));
        }

        let global = match self.applications.load(&app).await {
            Ok(global) => global,
            Err(e) => {
                warn!("Failed to load {}: {}", id, e);
                return Ok(ReconcileOutcome::Requeue(RETRY_DELAY));
            }
        };
        if !global.is_present() && !global.is_current_zone() {
            debug!("{} does not concern zone {}", id, self.runtime.zone_id);
            return Ok(ReconcileOutcome::Done);
        }

        let running = self.jobs.current(id).map(|job| RunningJob::of(job.as_ref()));
        let result = global.derive_new_status(running.as_ref(), self.factory.as_ref());

        if let Some(new_status) = &result.status {
            let updater = StatusUpdater::new(
                self.store.clone(),
                id.clone(),
                self.runtime.zone_id.clone(),
                self.events.clone(),
            );
            let observed = &app.status;
            let written = updater
                .update_status(|current, zone| merge_status(current, observed, new_status, zone))
                .await;
            if let Err(e) = written {
                warn!("Failed to write status of {}: {}", id, e);
                return Ok(ReconcileOutcome::Requeue(RETRY_DELAY));
            }
        }

        if let Some(job) = result.jobs.to_add {
            self.jobs.stop(id);
            self.jobs.execute(job);
        }
        Ok(ReconcileOutcome::Done)
    }
}

/// Drives a [`Reconciler`] from store events and a periodic resync
pub struct Controller {
    reconciler: Arc<Reconciler>,
    store: Arc<dyn ApplicationStore>,
    resync_interval: Duration,
}

impl Controller {
    pub fn new(
        reconciler: Arc<Reconciler>,
        store: Arc<dyn ApplicationStore>,
        resync_interval: Duration,
    ) -> Self {
        Self {
            reconciler,
            store,
            resync_interval,
        }
    }

    /// Run until `shutdown` flips or its sender is dropped; stops all jobs on exit.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.store.subscribe();
        let mut resync = tokio::time::interval(self.resync_interval);
        let mut queue: HashMap<ApplicationId, Instant> = HashMap::new();
        info!("Controller started");

        loop {
            let next_due = queue.values().min().copied();
            let due = async move {
                match next_due {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => schedule(&mut queue, event.application_id().clone(), Instant::now()),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Controller missed {} store events, resyncing", missed);
                        self.schedule_all(&mut queue).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = resync.tick() => self.schedule_all(&mut queue).await,
                _ = due => self.process_due(&mut queue).await,
            }
        }

        self.reconciler.jobs().stop_all();
        info!("Controller stopped");
    }

    async fn schedule_all(&self, queue: &mut HashMap<ApplicationId, Instant>) {
        match self.store.list().await {
            Ok(applications) => {
                let now = Instant::now();
                for app in applications {
                    schedule(queue, app.id(), now);
                }
            }
            Err(e) => error!("Failed to list applications: {}", e),
        }
    }

    async fn process_due(&self, queue: &mut HashMap<ApplicationId, Instant>) {
        let now = Instant::now();
        let due: Vec<ApplicationId> = queue
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in due {
            queue.remove(&id);
            match self.reconciler.reconcile(&id).await {
                Ok(ReconcileOutcome::Done) => {}
                Ok(ReconcileOutcome::Requeue(delay)) => {
                    schedule(queue, id, Instant::now() + delay)
                }
                Err(e) => {
                    warn!("Reconcile of {} failed: {}", id, e);
                    schedule(queue, id, Instant::now() + RETRY_DELAY);
                }
            }
        }
    }
}

/// Queue `id` at `at`, keeping an earlier entry.
fn schedule(queue: &mut HashMap<ApplicationId, Instant>, id: ApplicationId, at: Instant) {
    queue
        .entry(id)
        .and_modify(|current| *current = (*current).min(at))
        .or_insert(at);
}
