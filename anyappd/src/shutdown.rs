//! Shutdown handling for graceful daemon termination
//!
//! The HTTP server stops accepting requests first; then the background loops
//! are signalled and every running job is stopped so no job keeps writing
//! to the store after the daemon is gone.

use crate::zone::ZoneServices;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How long background loops get to notice the shutdown signal
pub(crate) const BACKGROUND_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait for Ctrl+C or SIGTERM
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

/// Signal the background loops, wait for them and stop all jobs.
pub(crate) async fn stop_background(
    services: &ZoneServices,
    stop: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    timeout: Duration,
) {
    if stop.send(true).is_err() {
        warn!("Background loops already stopped");
    }

    for handle in handles {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Background task failed: {}", e),
            Err(_) => warn!("Background task did not stop within {:?}", timeout),
        }
    }

    let running = services.jobs.len();
    services.jobs.stop_all();
    info!("Stopped {} running job(s)", running);
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyapp_core::Config;
    use tempfile::TempDir;

    async fn services(dir: &TempDir) -> ZoneServices {
        let mut config = Config::default();
        config.runtime.zone_id = "zone-a".to_string();
        config.charts.directory = Some(dir.path().to_path_buf());
        ZoneServices::build(&config, true).await.unwrap()
    }

    #[tokio::test]
    async fn test_stop_background_joins_loops() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir).await;
        let (stop, shutdown) = watch::channel(false);
        let handles = services.spawn_background(&shutdown);

        tokio::time::timeout(
            Duration::from_secs(5),
            stop_background(&services, stop, handles, BACKGROUND_STOP_TIMEOUT),
        )
        .await
        .unwrap();
        assert!(services.jobs.is_empty());
    }

    #[tokio::test]
    async fn test_stuck_task_times_out() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir).await;
        let (stop, _shutdown) = watch::channel(false);
        let stuck = tokio::spawn(std::future::pending::<()>());

        stop_background(&services, stop, vec![stuck], Duration::from_millis(20)).await;
    }
}
