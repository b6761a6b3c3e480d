//! Status exchange between zones
//!
//! Every zone exports its applications over the REST API. [`PeerSync`]
//! periodically pulls the export of each configured peer and folds it into
//! the local store with [`merge_remote`]: a zone is authoritative for its own
//! zone status, the owner zone for the global fields.

use crate::store::ApplicationStore;
use anyapp_core::api::ApiResponse;
use anyapp_core::config::{PeerConfig, PeerSyncConfig};
use anyapp_core::{AnyAppError, AnyApplication, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const EXPORT_PATH: &str = "/api/v0/applications/export";

/// HTTP client for one peer zone
#[derive(Debug, Clone)]
pub struct PeerClient {
    client: Client,
    base_url: String,
}

impl PeerClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("anyappd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AnyAppError::Peer(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.base_url
    }

    /// Applications known to the peer, with their status
    pub async fn export(&self) -> Result<Vec<AnyApplication>> {
        let url = format!("{}{}", self.base_url, EXPORT_PATH);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AnyAppError::Peer(format!("{}: {}", url, e)))?;

        let status = response.status();
        let body: ApiResponse<Vec<AnyApplication>> = response
            .json()
            .await
            .map_err(|e| AnyAppError::Peer(format!("{}: invalid response ({}): {}", url, status, e)))?;
        match body {
            ApiResponse::Success { data } => Ok(data),
            ApiResponse::Error { error } => Err(AnyAppError::Peer(format!("{}: {}", url, error))),
        }
    }
}

/// Fold a peer's copy of an application into the local one.
///
/// Returns the application to store, or `None` when nothing changes. Zone
/// statuses of other zones are taken when their zone version is newer; the
/// global fields when the remote copy supersedes the local one (see
/// [`AnyApplicationStatus::global_fields_supersede`]); the spec when the
/// remote generation is higher. Deletions are not propagated.
///
/// [`AnyApplicationStatus::global_fields_supersede`]: anyapp_core::AnyApplicationStatus::global_fields_supersede
pub fn merge_remote(
    local: Option<&AnyApplication>,
    remote: &AnyApplication,
    zone: &str,
) -> Option<AnyApplication> {
    let Some(local) = local else {
        if remote.is_being_deleted() {
            return None;
        }
        let mut adopted = remote.clone();
        adopted.metadata.finalizers.clear();
        adopted.metadata.deletion_timestamp = None;
        return Some(adopted);
    };

    let mut merged = local.clone();
    let mut changed = false;

    for remote_zone in remote.status.zones.iter().filter(|z| z.zone_id != zone) {
        match merged.status.status_for_mut(&remote_zone.zone_id) {
            Some(existing) if existing.zone_version >= remote_zone.zone_version => {}
            Some(existing) => {
                *existing = remote_zone.clone();
                changed = true;
            }
            None => {
                merged.status.zones.push(remote_zone.clone());
                changed = true;
            }
        }
    }

    if remote.status.global_fields_supersede(&merged.status) {
        merged.status.copy_global_fields(&remote.status);
        changed = true;
    }

    if remote.metadata.generation > local.metadata.generation && remote.spec != local.spec {
        merged.spec = remote.spec.clone();
        merged.metadata.generation = remote.metadata.generation;
        changed = true;
    }

    changed.then_some(merged)
}

/// Periodic pull from every peer zone
pub struct PeerSync {
    peers: Vec<PeerClient>,
    store: Arc<dyn ApplicationStore>,
    zone: String,
    interval: Duration,
}

impl PeerSync {
    pub fn new(
        peers: &[PeerConfig],
        config: &PeerSyncConfig,
        store: Arc<dyn ApplicationStore>,
        zone: impl Into<String>,
    ) -> Result<Self> {
        let peers = peers
            .iter()
            .map(|peer| PeerClient::new(&peer.url, config.timeout))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            peers,
            store,
            zone: zone.into(),
            interval: config.interval,
        })
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Pull once from every peer; returns the number of applications written.
    pub async fn sync_once(&self) -> usize {
        let mut applied = 0;
        for peer in &self.peers {
            let remote_apps = match peer.export().await {
                Ok(apps) => apps,
                Err(e) => {
                    warn!("Peer sync with {} failed: {}", peer.url(), e);
                    continue;
                }
            };
            for remote in remote_apps {
                if self.merge_one(&remote).await {
                    applied += 1;
                }
            }
        }
        applied
    }

    async fn merge_one(&self, remote: &AnyApplication) -> bool {
        let id = remote.id();
        let local = match self.store.get(&id).await {
            Ok(local) => local,
            Err(e) => {
                warn!("Failed to read {}: {}", id, e);
                return false;
            }
        };
        let Some(merged) = merge_remote(local.as_ref(), remote, &self.zone) else {
            return false;
        };
        match self.store.apply_remote(merged).await {
            Ok(_) => {
                debug!("Applied remote state of {}", id);
                true
            }
            Err(e) if e.is_conflict() => {
                debug!("Remote state of {} raced a local write, next round", id);
                false
            }
            Err(e) => {
                warn!("Failed to apply remote state of {}: {}", id, e);
                false
            }
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if self.peers.is_empty() {
            debug!("No peers configured, peer sync disabled");
            return;
        }
        info!(
            "Peer sync with {} peer(s) every {:?}",
            self.peers.len(),
            self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let applied = self.sync_once().await;
                    if applied > 0 {
                        debug!("Peer sync applied {} change(s)", applied);
                    }
                }
            }
        }
        info!("Peer sync stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing;
    use anyapp_core::{GlobalState, Placement, ZoneStatus};
    use axum::routing::get;
    use axum::{Json, Router};

    fn zone_status(zone: &str, version: i64, chart: &str) -> ZoneStatus {
        ZoneStatus {
            zone_version: version,
            chart_version: chart.to_string(),
            ..ZoneStatus::new(zone)
        }
    }

    #[test]
    fn test_unknown_application_is_adopted() {
        let mut remote = testing::application("web", "1.0.0");
        remote.status.owner = "zone-b".to_string();
        let adopted = merge_remote(None, &remote, "zone-a").unwrap();
        assert!(adopted.metadata.finalizers.is_empty());
        assert_eq!(adopted.status.owner, "zone-b");

        remote.metadata.deletion_timestamp = Some(chrono::Utc::now());
        assert!(merge_remote(None, &remote, "zone-a").is_none());
    }

    #[test]
    fn test_newer_zone_status_wins() {
        let mut local = testing::application("web", "1.0.0");
        local.status.zones = vec![zone_status("zone-a", 5, "1.0.0"), zone_status("zone-b", 3, "1.0.0")];

        let mut remote = local.clone();
        remote.status.zones = vec![
            zone_status("zone-a", 9, "0.9.0"),
            zone_status("zone-b", 4, "1.1.0"),
            zone_status("zone-c", 1, "1.0.0"),
        ];

        let merged = merge_remote(Some(&local), &remote, "zone-a").unwrap();
        assert_eq!(merged.status.chart_version_for("zone-a"), Some("1.0.0"));
        assert_eq!(merged.status.chart_version_for("zone-b"), Some("1.1.0"));
        assert_eq!(merged.status.chart_version_for("zone-c"), Some("1.0.0"));

        remote.status.zones = vec![zone_status("zone-b", 2, "0.1.0")];
        assert!(merge_remote(Some(&local), &remote, "zone-a").is_none());
    }

    fn owned(owner: &str, global_version: i64) -> AnyApplication {
        let mut app = testing::application("web", "1.0.0");
        app.status.owner = owner.to_string();
        app.status.state = GlobalState::Placement;
        app.status.placements = Some(vec![Placement::new(owner)]);
        app.status.global_version = global_version;
        app
    }

    #[test]
    fn test_global_fields_follow_global_version() {
        let local = owned("zone-b", 3);

        let mut remote = local.clone();
        remote.status.state = GlobalState::Operational;
        remote.status.placements = Some(vec![Placement::new("zone-a")]);
        remote.status.global_version = 4;

        let merged = merge_remote(Some(&local), &remote, "zone-a").unwrap();
        assert_eq!(merged.status.state, GlobalState::Operational);
        assert_eq!(merged.status.placement_zones(), vec!["zone-a".to_string()]);
        assert_eq!(merged.status.global_version, 4);

        // An older copy does not overwrite global fields
        let mut stale = remote.clone();
        stale.status.global_version = 2;
        assert!(merge_remote(Some(&local), &stale, "zone-a").is_none());
    }

    #[test]
    fn test_own_ownership_is_not_overwritten() {
        let mut local = owned("zone-a", 5);
        local.status.state = GlobalState::Operational;

        let mut remote = local.clone();
        remote.status.state = GlobalState::Failure;
        remote.status.zones = vec![zone_status("zone-a", 100, "")];
        assert!(merge_remote(Some(&local), &remote, "zone-a").is_none());
    }

    #[test]
    fn test_concurrent_claims_converge() {
        let a = owned("zone-a", 1);
        let b = owned("zone-b", 1);

        // zone-a keeps its claim, zone-b yields to it
        let a_after = merge_remote(Some(&a), &b, "zone-a");
        assert!(a_after.is_none());
        let b_after = merge_remote(Some(&b), &a, "zone-b").unwrap();
        assert_eq!(b_after.status.owner, "zone-a");
        assert_eq!(b_after.status.placement_zones(), vec!["zone-a".to_string()]);

        // Further rounds agree
        assert!(merge_remote(Some(&a), &b_after, "zone-a").is_none());
        assert!(merge_remote(Some(&b_after), &a, "zone-b").is_none());
    }

    #[test]
    fn test_ownership_transfer_survives_old_owner_writes() {
        // zone-a took ownership from zone-b
        let mut taken = owned("zone-b", 4);
        taken.status.owner = "zone-a".to_string();
        taken.status.state = GlobalState::OwnershipTransfer;
        taken.status.global_version = 5;
        taken.status.zones = vec![zone_status("zone-a", 10, "")];

        // zone-b, not yet aware, keeps writing its own conditions
        let mut old_owner = owned("zone-b", 4);
        old_owner.status.zones = vec![zone_status("zone-b", 20, "1.0.0")];

        let at_a = merge_remote(Some(&taken), &old_owner, "zone-a").unwrap();
        assert_eq!(at_a.status.owner, "zone-a");
        assert_eq!(at_a.status.state, GlobalState::OwnershipTransfer);
        assert_eq!(at_a.status.chart_version_for("zone-b"), Some("1.0.0"));

        let at_b = merge_remote(Some(&old_owner), &taken, "zone-b").unwrap();
        assert_eq!(at_b.status.owner, "zone-a");
        assert_eq!(at_b.status.global_version, 5);
    }

    #[test]
    fn test_newer_spec_is_taken() {
        let local = testing::application("web", "1.0.0");
        let mut remote = local.clone();
        remote.spec.zones = 2;
        remote.metadata.generation = local.metadata.generation + 1;

        let merged = merge_remote(Some(&local), &remote, "zone-a").unwrap();
        assert_eq!(merged.spec.zones, 2);
        assert_eq!(merged.metadata.generation, remote.metadata.generation);

        let mut older = remote.clone();
        older.metadata.generation = local.metadata.generation;
        assert!(merge_remote(Some(&local), &older, "zone-a").is_none());
    }

    async fn serve_export(apps: Vec<AnyApplication>) -> String {
        let router = Router::new().route(
            EXPORT_PATH,
            get(move || {
                let apps = apps.clone();
                async move { Json(ApiResponse::success(apps)) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_sync_pulls_from_peers() {
        let mut remote = testing::application("web", "1.0.0");
        remote.status.owner = "zone-b".to_string();
        remote.status.state = GlobalState::Operational;
        remote.status.zones = vec![zone_status("zone-b", 2, "1.0.0")];
        let url = serve_export(vec![remote]).await;

        let store = Arc::new(MemoryStore::new());
        let sync = PeerSync::new(
            &[
                PeerConfig { url },
                PeerConfig {
                    url: "http://127.0.0.1:9".to_string(),
                },
            ],
            &PeerSyncConfig {
                interval: Duration::from_millis(20),
                timeout: Duration::from_millis(500),
            },
            store.clone(),
            "zone-a",
        )
        .unwrap();
        assert_eq!(sync.peer_count(), 2);

        assert_eq!(sync.sync_once().await, 1);
        let stored = store.list().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status.owner, "zone-b");
        assert_eq!(stored[0].metadata.resource_version, 1);

        // Nothing new on the second round
        assert_eq!(sync.sync_once().await, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let url = serve_export(Vec::new()).await;
        let store = Arc::new(MemoryStore::new());
        let sync = PeerSync::new(
            &[PeerConfig { url }],
            &PeerSyncConfig {
                interval: Duration::from_millis(10),
                timeout: Duration::from_millis(500),
            },
            store,
            "zone-a",
        )
        .unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { sync.run(rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("peer sync should stop")
            .unwrap();
    }
}
