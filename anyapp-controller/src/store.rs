//! Application store
//!
//! Holds the `AnyApplication` resources known to this zone. Writes follow
//! optimistic concurrency: every write carries the resource version it was
//! based on and fails with [`AnyAppError::Conflict`] when that version is stale.
//! Subscribers receive a [`StoreEvent`] after every successful write.

use anyapp_core::{AnyAppError, AnyApplication, ApplicationId, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Change notification emitted by a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Applied(ApplicationId),
    Deleted(ApplicationId),
}

impl StoreEvent {
    pub fn application_id(&self) -> &ApplicationId {
        match self {
            StoreEvent::Applied(id) | StoreEvent::Deleted(id) => id,
        }
    }
}

/// Persistent view of the applications
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn get(&self, id: &ApplicationId) -> Result<Option<AnyApplication>>;

    async fn list(&self) -> Result<Vec<AnyApplication>>;

    /// Insert a new application; fails with `AlreadyExists` on duplicates.
    async fn create(&self, app: AnyApplication) -> Result<AnyApplication>;

    /// Write metadata and spec, keeping the stored status.
    async fn update(&self, app: AnyApplication) -> Result<AnyApplication>;

    /// Write the status only.
    async fn update_status(&self, app: AnyApplication) -> Result<AnyApplication>;

    /// Delete, or mark as being deleted while finalizers remain.
    async fn delete(&self, id: &ApplicationId) -> Result<()>;

    /// Insert or replace spec and status with a copy received from a peer zone.
    async fn apply_remote(&self, app: AnyApplication) -> Result<AnyApplication>;

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// In-memory store with optional YAML persistence
pub struct MemoryStore {
    applications: RwLock<HashMap<ApplicationId, AnyApplication>>,
    events: broadcast::Sender<StoreEvent>,
    state_file: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            applications: RwLock::new(HashMap::new()),
            events,
            state_file: None,
        }
    }

    /// Create a store backed by a state file, loading it when it exists.
    pub async fn with_state_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut store = Self::new();
        if path.exists() {
            let loaded = load_state_file(&path).await?;
            info!(
                "Loaded {} application(s) from {}",
                loaded.len(),
                path.display()
            );
            store.applications = RwLock::new(
                loaded
                    .into_iter()
                    .map(|app| (app.id(), app))
                    .collect(),
            );
        }
        store.state_file = Some(path);
        Ok(store)
    }

    async fn persist(&self, applications: &HashMap<ApplicationId, AnyApplication>) -> Result<()> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };
        let mut sorted: Vec<&AnyApplication> = applications.values().collect();
        sorted.sort_by_key(|app| app.id());
        let content = serde_yaml::to_string(&sorted)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content).await?;
        debug!("Persisted {} application(s) to {}", sorted.len(), path.display());
        Ok(())
    }

    /// Install or remove one entry and persist the result.
    ///
    /// When persisting fails the previous entry is restored, so a failed
    /// write leaves neither the map nor the state file changed.
    async fn write_entry(
        &self,
        applications: &mut HashMap<ApplicationId, AnyApplication>,
        id: &ApplicationId,
        next: Option<AnyApplication>,
    ) -> Result<()> {
        let previous = match next {
            Some(app) => applications.insert(id.clone(), app),
            None => applications.remove(id),
        };
        if let Err(e) = self.persist(applications).await {
            warn!("Failed to persist {}, write discarded: {}", id, e);
            match previous {
                Some(app) => applications.insert(id.clone(), app),
                None => applications.remove(id),
            };
            return Err(e);
        }
        Ok(())
    }

    fn notify(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

async fn load_state_file(path: &Path) -> Result<Vec<AnyApplication>> {
    let content = tokio::fs::read_to_string(path).await?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_yaml::from_str(&content).map_err(|e| {
        AnyAppError::Config(format!(
            "failed to parse state file {}: {}",
            path.display(),
            e
        ))
    })
}

fn check_version(current: &AnyApplication, incoming: &AnyApplication) -> Result<()> {
    if current.metadata.resource_version != incoming.metadata.resource_version {
        return Err(AnyAppError::Conflict {
            name: current.id().to_string(),
            expected: incoming.metadata.resource_version,
            actual: current.metadata.resource_version,
        });
    }
    Ok(())
}

fn not_found(id: &ApplicationId) -> AnyAppError {
    AnyAppError::not_found("AnyApplication", id.to_string())
}

#[async_trait]
impl ApplicationStore for MemoryStore {
    async fn get(&self, id: &ApplicationId) -> Result<Option<AnyApplication>> {
        Ok(self.applications.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<AnyApplication>> {
        let applications = self.applications.read().await;
        let mut list: Vec<AnyApplication> = applications.values().cloned().collect();
        list.sort_by_key(|app| app.id());
        Ok(list)
    }

    async fn create(&self, mut app: AnyApplication) -> Result<AnyApplication> {
        let id = app.id();
        let mut applications = self.applications.write().await;
        if applications.contains_key(&id) {
            return Err(AnyAppError::AlreadyExists(format!("AnyApplication {}", id)));
        }
        app.metadata.resource_version = 1;
        app.metadata.generation = 1;
        app.metadata.creation_timestamp = Some(Utc::now());
        app.metadata.deletion_timestamp = None;
        self.write_entry(&mut applications, &id, Some(app.clone()))
            .await?;
        drop(applications);

        debug!("Created application {}", id);
        self.notify(StoreEvent::Applied(id));
        Ok(app)
    }

    async fn update(&self, app: AnyApplication) -> Result<AnyApplication> {
        let id = app.id();
        let mut applications = self.applications.write().await;
        let current = applications.get(&id).ok_or_else(|| not_found(&id))?;
        check_version(current, &app)?;

        let mut next = current.clone();
        if next.spec != app.spec {
            next.metadata.generation += 1;
        }
        next.spec = app.spec;
        next.metadata.finalizers = app.metadata.finalizers;
        next.metadata.labels = app.metadata.labels;
        next.metadata.resource_version += 1;

        if next.is_being_deleted() && next.metadata.finalizers.is_empty() {
            self.write_entry(&mut applications, &id, None).await?;
            drop(applications);
            debug!("Removed application {} after its last finalizer", id);
            self.notify(StoreEvent::Deleted(id));
            return Ok(next);
        }

        self.write_entry(&mut applications, &id, Some(next.clone()))
            .await?;
        drop(applications);
        self.notify(StoreEvent::Applied(id));
        Ok(next)
    }

    async fn update_status(&self, app: AnyApplication) -> Result<AnyApplication> {
        let id = app.id();
        let mut applications = self.applications.write().await;
        let current = applications.get(&id).ok_or_else(|| not_found(&id))?;
        check_version(current, &app)?;

        let mut updated = current.clone();
        updated.status = app.status;
        updated.metadata.resource_version += 1;
        self.write_entry(&mut applications, &id, Some(updated.clone()))
            .await?;
        drop(applications);
        self.notify(StoreEvent::Applied(id));
        Ok(updated)
    }

    async fn delete(&self, id: &ApplicationId) -> Result<()> {
        let mut applications = self.applications.write().await;
        let current = applications.get(id).ok_or_else(|| not_found(id))?;

        if current.metadata.finalizers.is_empty() {
            self.write_entry(&mut applications, id, None).await?;
            drop(applications);
            self.notify(StoreEvent::Deleted(id.clone()));
            return Ok(());
        }

        if current.metadata.deletion_timestamp.is_none() {
            let mut marked = current.clone();
            marked.metadata.deletion_timestamp = Some(Utc::now());
            marked.metadata.resource_version += 1;
            self.write_entry(&mut applications, id, Some(marked)).await?;
        }
        drop(applications);
        self.notify(StoreEvent::Applied(id.clone()));
        Ok(())
    }

    async fn apply_remote(&self, mut app: AnyApplication) -> Result<AnyApplication> {
        let id = app.id();
        let mut applications = self.applications.write().await;
        let next = match applications.get(&id) {
            Some(current) => {
                check_version(current, &app)?;
                let mut next = current.clone();
                next.metadata.generation = next.metadata.generation.max(app.metadata.generation);
                next.spec = app.spec;
                next.status = app.status;
                next.metadata.resource_version += 1;
                next
            }
            None => {
                app.metadata.resource_version = 1;
                app.metadata.finalizers.clear();
                app.metadata.deletion_timestamp = None;
                if app.metadata.creation_timestamp.is_none() {
                    app.metadata.creation_timestamp = Some(Utc::now());
                }
                app
            }
        };
        self.write_entry(&mut applications, &id, Some(next.clone()))
            .await?;
        drop(applications);
        self.notify(StoreEvent::Applied(id));
        Ok(next)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
