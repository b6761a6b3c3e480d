//! Zone services: everything the daemon runs for its zone
//!
//! Builds the store, cluster and chart backends, the job registry, the
//! reconcile loop and peer sync from the configuration, and owns the
//! background tasks started from them.

use anyapp_controller::{
    ApplicationStore, Applications, Charts, Clock, Cluster, ClusterApplications, Controller,
    DefaultJobFactory, DirectoryCharts, Events, HelmCharts, JobContext, Jobs, KubectlCluster,
    MemoryCluster, MemoryStore, PeerSync, Reconciler, RecordingEvents, Reports, SystemClock,
};
use anyapp_controller::events::DEFAULT_EVENT_CAPACITY;
use anyapp_core::Config;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub(crate) struct ZoneServices {
    pub zone: String,
    pub mock: bool,
    pub peer_urls: Vec<String>,
    pub store: Arc<dyn ApplicationStore>,
    pub applications: Arc<dyn Applications>,
    pub events: Arc<dyn Events>,
    pub jobs: Arc<Jobs>,
    pub reports: Arc<Reports>,
    controller: Arc<Controller>,
    peer_sync: Arc<PeerSync>,
    // Cancels the job context; jobs are stopped explicitly on shutdown.
    _job_stop: watch::Sender<bool>,
}

impl ZoneServices {
    /// Wire the zone from its configuration.
    ///
    /// With `mock` the cluster is simulated in memory and workloads become
    /// ready on their own.
    pub async fn build(config: &Config, mock: bool) -> Result<Self> {
        let runtime = config.runtime.clone();
        let zone = runtime.zone_id.clone();

        let store: Arc<dyn ApplicationStore> = match &config.store.state_file {
            Some(path) => {
                info!("Application state file: {}", path.display());
                Arc::new(
                    MemoryStore::with_state_file(path)
                        .await
                        .context("Failed to load application state")?,
                )
            }
            None => {
                warn!("No state file configured, applications are kept in memory only");
                Arc::new(MemoryStore::new())
            }
        };

        let excludes = config.cache.excludes_set();
        let cluster: Arc<dyn Cluster> = if mock {
            info!("Mock mode: using the in-memory cluster");
            Arc::new(MemoryCluster::new().with_readiness().with_excludes(excludes))
        } else {
            info!("Cluster access through {}", config.cluster.kubectl_binary);
            Arc::new(KubectlCluster::new(&config.cluster.kubectl_binary).with_excludes(excludes))
        };

        let charts: Arc<dyn Charts> = match &config.charts.directory {
            Some(directory) => {
                info!("Charts from directory {}", directory.display());
                Arc::new(DirectoryCharts::new(directory))
            }
            None => {
                info!("Charts through {}", config.charts.helm_binary);
                Arc::new(HelmCharts::new(
                    &config.charts.helm_binary,
                    runtime.chart_version_poll_interval,
                ))
            }
        };

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let applications: Arc<dyn Applications> = Arc::new(ClusterApplications::new(
            cluster.clone(),
            charts,
            runtime.clone(),
            clock.clone(),
        ));
        let events: Arc<dyn Events> = Arc::new(RecordingEvents::new(DEFAULT_EVENT_CAPACITY));

        let (context, job_stop) = JobContext::new(
            store.clone(),
            applications.clone(),
            events.clone(),
            clock.clone(),
            runtime.clone(),
        );
        let jobs = Arc::new(Jobs::new(context));
        let factory = Arc::new(DefaultJobFactory::new(runtime.clone(), clock));

        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            applications.clone(),
            jobs.clone(),
            factory,
            events.clone(),
            runtime.clone(),
        ));
        let controller = Arc::new(Controller::new(
            reconciler,
            store.clone(),
            runtime.poll_operational_status_interval,
        ));

        let peer_sync = Arc::new(
            PeerSync::new(&config.peers, &config.peer_sync, store.clone(), &zone)
                .context("Failed to set up peer clients")?,
        );
        let reports = Arc::new(Reports::new(applications.clone(), cluster, &zone));

        Ok(Self {
            zone,
            mock,
            peer_urls: config.peers.iter().map(|p| p.url.clone()).collect(),
            store,
            applications,
            events,
            jobs,
            reports,
            controller,
            peer_sync,
            _job_stop: job_stop,
        })
    }

    /// Start the reconcile loop and peer sync.
    pub fn spawn_background(&self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let controller = self.controller.clone();
        let controller_shutdown = shutdown.clone();
        let peer_sync = self.peer_sync.clone();
        let peer_shutdown = shutdown.clone();

        info!(
            "Starting controller for zone {} with {} peer(s)",
            self.zone,
            self.peer_sync.peer_count()
        );
        vec![
            tokio::spawn(async move { controller.run(controller_shutdown).await }),
            tokio::spawn(async move { peer_sync.run(peer_shutdown).await }),
        ]
    }
}
