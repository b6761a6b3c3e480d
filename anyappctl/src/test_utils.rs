//! Test utilities for CLI testing
//!
//! Provides an in-process stand-in for the zone daemon's REST API, backed by
//! an in-memory map instead of a cluster.

use anyhow::Result;
use anyapp_core::api::{
    ApiResponse, ApplicationReport, ApplicationSpecReport, ApplicationSummary, EventRecord,
    InfoResponse, PlacementRequest,
};
use anyapp_core::{
    AnyApplication, ApplicationConditionType, ApplicationId, ConditionStatus, GlobalState,
    OwnershipTransferStatus, Placement, PlacementStrategy,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// Zone id the mock daemon reports
pub const MOCK_ZONE: &str = "zone-test";

/// Mock server state
#[derive(Debug, Clone, Default)]
pub struct MockServerState {
    pub applications: Arc<Mutex<BTreeMap<ApplicationId, AnyApplication>>>,
    pub events: Arc<Mutex<BTreeMap<ApplicationId, Vec<EventRecord>>>>,
}

impl MockServerState {
    async fn record(&self, id: &ApplicationId, reason: &str, msg: String) {
        self.events
            .lock()
            .await
            .entry(id.clone())
            .or_default()
            .push(EventRecord {
                timestamp: Utc::now(),
                reason: reason.to_string(),
                msg,
            });
    }
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    limit: Option<usize>,
}

type MockError = (StatusCode, Json<ApiResponse<()>>);
type MockResult<T> = std::result::Result<Json<ApiResponse<T>>, MockError>;

fn fail(status: StatusCode, message: impl Into<String>) -> MockError {
    (status, Json(ApiResponse::error(message.into())))
}

fn not_found(id: &ApplicationId) -> MockError {
    fail(
        StatusCode::NOT_FOUND,
        format!("AnyApplication not found: {}", id),
    )
}

/// Mock server implementation
#[derive(Debug, Default)]
pub struct MockServer {
    state: MockServerState,
    port: u16,
}

impl MockServer {
    /// Create a new mock server
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an application before the server starts.
    pub async fn with_application(self, app: AnyApplication) -> Self {
        self.state
            .applications
            .lock()
            .await
            .insert(app.id(), app);
        self
    }

    /// Start the mock server and return its URL
    pub async fn start(mut self) -> Result<(Self, String)> {
        let app = self.create_router();

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        self.port = addr.port();

        let server_url = format!("http://127.0.0.1:{}", self.port);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Mock server error: {}", e);
            }
        });

        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if tokio::net::TcpStream::connect(("127.0.0.1", self.port))
                .await
                .is_ok()
            {
                break;
            }
        }

        Ok((self, server_url))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &MockServerState {
        &self.state
    }

    fn create_router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/api/v0/info", get(info_handler))
            .route(
                "/api/v0/applications",
                get(list_handler).post(create_handler),
            )
            .route(
                "/api/v0/applications/:namespace/:name",
                get(get_handler).put(update_handler).delete(delete_handler),
            )
            .route(
                "/api/v0/applications/:namespace/:name/placements",
                put(placements_handler),
            )
            .route(
                "/api/v0/applications/:namespace/:name/ownership",
                post(ownership_handler),
            )
            .route("/api/v0/status/:namespace/:name", get(status_handler))
            .route("/api/v0/spec/:namespace/:name", get(spec_handler))
            .route("/api/v0/events/:namespace/:name", get(events_handler))
            .with_state(self.state.clone())
    }
}

async fn root_handler() -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::success(serde_json::json!({
        "service": "AnyApplication zone daemon",
        "status": "ok",
        "zone": MOCK_ZONE,
        "version": "0.0.0-test"
    })))
}

async fn info_handler(State(state): State<MockServerState>) -> Json<ApiResponse<InfoResponse>> {
    let applications = state.applications.lock().await.len();
    Json(ApiResponse::success(InfoResponse {
        version: "0.0.0-test".to_string(),
        zone: MOCK_ZONE.to_string(),
        uptime: 60,
        peers: vec!["http://zone-peer:8090".to_string()],
        mock: true,
        applications,
        running_jobs: 0,
    }))
}

async fn list_handler(State(state): State<MockServerState>) -> MockResult<Vec<ApplicationSummary>> {
    let apps = state.applications.lock().await;
    Ok(Json(ApiResponse::success(
        apps.values().map(ApplicationSummary::from).collect(),
    )))
}

async fn get_handler(
    State(state): State<MockServerState>,
    Path((namespace, name)): Path<(String, String)>,
) -> MockResult<AnyApplication> {
    let id = ApplicationId::new(namespace, name);
    let apps = state.applications.lock().await;
    apps.get(&id)
        .cloned()
        .map(|app| Json(ApiResponse::success(app)))
        .ok_or_else(|| not_found(&id))
}

async fn create_handler(
    State(state): State<MockServerState>,
    Json(mut app): Json<AnyApplication>,
) -> MockResult<AnyApplication> {
    if app.metadata.namespace.is_empty() {
        app.metadata.namespace = "default".to_string();
    }
    app.validate()
        .map_err(|e| fail(StatusCode::BAD_REQUEST, e.to_string()))?;

    let id = app.id();
    {
        let mut apps = state.applications.lock().await;
        if apps.contains_key(&id) {
            return Err(fail(
                StatusCode::CONFLICT,
                format!("AnyApplication already exists: {}", id),
            ));
        }
        app.metadata.resource_version = 1;
        app.status = Default::default();
        apps.insert(id.clone(), app.clone());
    }
    state.record(&id, "Created", format!("{} created", id)).await;
    Ok(Json(ApiResponse::success(app)))
}

async fn update_handler(
    State(state): State<MockServerState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(mut app): Json<AnyApplication>,
) -> MockResult<AnyApplication> {
    let id = ApplicationId::new(namespace, name);
    if app.metadata.namespace.is_empty() {
        app.metadata.namespace = id.namespace.clone();
    }
    if app.id() != id {
        return Err(fail(StatusCode::BAD_REQUEST, "path does not match body"));
    }

    let mut apps = state.applications.lock().await;
    let current = apps.get(&id).ok_or_else(|| not_found(&id))?;
    let version = app.metadata.resource_version;
    if version != 0 && version != current.metadata.resource_version {
        return Err(fail(
            StatusCode::CONFLICT,
            format!("stale resource version {}", version),
        ));
    }
    app.metadata.resource_version = current.metadata.resource_version + 1;
    app.status = current.status.clone();
    apps.insert(id, app.clone());
    Ok(Json(ApiResponse::success(app)))
}

async fn delete_handler(
    State(state): State<MockServerState>,
    Path((namespace, name)): Path<(String, String)>,
) -> MockResult<()> {
    let id = ApplicationId::new(namespace, name);
    state
        .applications
        .lock()
        .await
        .remove(&id)
        .ok_or_else(|| not_found(&id))?;
    Ok(Json(ApiResponse::success(())))
}

async fn placements_handler(
    State(state): State<MockServerState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(request): Json<PlacementRequest>,
) -> MockResult<AnyApplication> {
    let id = ApplicationId::new(namespace, name);
    let mut apps = state.applications.lock().await;
    let app = apps.get_mut(&id).ok_or_else(|| not_found(&id))?;
    if app.spec.placement_strategy.strategy != PlacementStrategy::Global {
        return Err(fail(
            StatusCode::BAD_REQUEST,
            "placements can only be set for the Global strategy",
        ));
    }
    if request.zones.is_empty() {
        return Err(fail(StatusCode::BAD_REQUEST, "at least one zone is required"));
    }
    app.status.owner = MOCK_ZONE.to_string();
    app.status.placements = Some(request.zones.iter().map(Placement::new).collect());
    app.status.state = GlobalState::Placement;
    app.status.global_version += 1;
    Ok(Json(ApiResponse::success(app.clone())))
}

async fn ownership_handler(
    State(state): State<MockServerState>,
    Path((namespace, name)): Path<(String, String)>,
) -> MockResult<AnyApplication> {
    let id = ApplicationId::new(namespace, name);
    let mut apps = state.applications.lock().await;
    let app = apps.get_mut(&id).ok_or_else(|| not_found(&id))?;
    if app.status.owner != MOCK_ZONE {
        let condition = ConditionStatus::new(
            ApplicationConditionType::OwnershipTransfer,
            MOCK_ZONE,
            OwnershipTransferStatus::Pulling,
            Utc::now(),
        );
        if app.status.add_or_update(&condition, MOCK_ZONE) {
            app.increment_zone_version(MOCK_ZONE);
        }
    }
    Ok(Json(ApiResponse::success(app.clone())))
}

async fn status_handler(
    State(state): State<MockServerState>,
    Path((namespace, name)): Path<(String, String)>,
) -> MockResult<ApplicationReport> {
    let id = ApplicationId::new(namespace, name);
    let apps = state.applications.lock().await;
    let app = apps.get(&id).ok_or_else(|| not_found(&id))?;
    Ok(Json(ApiResponse::success(ApplicationReport {
        name: id.name.clone(),
        namespace: id.namespace.clone(),
        zone: MOCK_ZONE.to_string(),
        state: app.status.state,
        workloads: Vec::new(),
        pods: Vec::new(),
    })))
}

async fn spec_handler(
    State(state): State<MockServerState>,
    Path((namespace, name)): Path<(String, String)>,
) -> MockResult<ApplicationSpecReport> {
    let id = ApplicationId::new(namespace, name);
    if !state.applications.lock().await.contains_key(&id) {
        return Err(not_found(&id));
    }
    Ok(Json(ApiResponse::success(ApplicationSpecReport {
        name: id.name,
        namespace: id.namespace,
        pods: Vec::new(),
        pvcs: Vec::new(),
    })))
}

async fn events_handler(
    State(state): State<MockServerState>,
    Path((namespace, name)): Path<(String, String)>,
    Query(query): Query<EventsQuery>,
) -> MockResult<Vec<EventRecord>> {
    let id = ApplicationId::new(namespace, name);
    let mut events = state
        .events
        .lock()
        .await
        .get(&id)
        .cloned()
        .unwrap_or_default();
    if events.is_empty() && !state.applications.lock().await.contains_key(&id) {
        return Err(not_found(&id));
    }
    if let Some(limit) = query.limit {
        let skip = events.len().saturating_sub(limit);
        events.drain(..skip);
    }
    Ok(Json(ApiResponse::success(events)))
}
