//! Application handlers: CRUD, placements, ownership and peer export

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::{api_fail, api_ok};
use anyapp_core::api::{ApiResponse, ApplicationSummary, PlacementRequest};
use anyapp_core::{
    AnyApplication, AnyApplicationStatus, ApplicationConditionType, ApplicationId,
    ConditionStatus, OwnershipTransferStatus, Placement, PlacementStrategy,
};
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use tracing::{debug, info};

async fn load(state: &AppState, id: &ApplicationId) -> Result<AnyApplication, ApiError> {
    state
        .store
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("AnyApplication not found: {}", id)))
}

/// List applications known to this zone.
///
/// # Endpoint
///
/// `GET /api/v0/applications`
pub async fn list_applications(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<ApplicationSummary>>>, ApiError> {
    debug!("Request: GET /api/v0/applications");

    let summaries: Vec<ApplicationSummary> = state
        .store
        .list()
        .await?
        .iter()
        .map(ApplicationSummary::from)
        .collect();

    debug!("Listed {} application(s)", summaries.len());
    api_ok!(summaries)
}

/// Full resources, as pulled by peer zones.
///
/// # Endpoint
///
/// `GET /api/v0/applications/export`
pub async fn export_applications(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<AnyApplication>>>, ApiError> {
    debug!("Request: GET /api/v0/applications/export");
    api_ok!(state.store.list().await?)
}

/// # Endpoint
///
/// `GET /api/v0/applications/:namespace/:name`
pub async fn get_application(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<ApiResponse<AnyApplication>>, ApiError> {
    debug!("Request: GET /api/v0/applications/{}/{}", namespace, name);
    api_ok!(load(&state, &ApplicationId::new(namespace, name)).await?)
}

/// Create an application.
///
/// The status and finalizers of the submitted resource are ignored; the
/// controller fills them in.
///
/// # Endpoint
///
/// `POST /api/v0/applications`
///
/// # Errors
///
/// - 400 when the resource does not validate
/// - 409 when an application with the same name exists
pub async fn create_application(
    State(state): State<AppState>,
    Json(mut app): Json<AnyApplication>,
) -> Result<Json<ApiResponse<AnyApplication>>, ApiError> {
    debug!("Request: POST /api/v0/applications");

    if app.metadata.namespace.is_empty() {
        app.metadata.namespace = "default".to_string();
    }
    app.validate()?;
    app.status = AnyApplicationStatus::default();
    app.metadata.finalizers.clear();

    let created = state.store.create(app).await?;
    info!("Created application {}", created.id());
    api_ok!(created)
}

/// Replace the spec of an application.
///
/// A `resourceVersion` of 0 means "whatever is current"; any other value
/// must match the stored one.
///
/// # Endpoint
///
/// `PUT /api/v0/applications/:namespace/:name`
///
/// # Errors
///
/// - 400 when the body names another application or does not validate
/// - 404 when the application does not exist
/// - 409 when the resource version is stale
pub async fn update_application(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(mut app): Json<AnyApplication>,
) -> Result<Json<ApiResponse<AnyApplication>>, ApiError> {
    debug!("Request: PUT /api/v0/applications/{}/{}", namespace, name);

    if app.metadata.namespace.is_empty() {
        app.metadata.namespace = namespace.clone();
    }
    if app.metadata.namespace != namespace || app.metadata.name != name {
        return api_fail!(format!(
            "Body names {} but the path is {}/{}",
            app.id(),
            namespace,
            name
        ));
    }
    app.validate()?;

    let current = load(&state, &app.id()).await?;
    if app.metadata.resource_version == 0 {
        app.metadata.resource_version = current.metadata.resource_version;
    }
    app.metadata.finalizers = current.metadata.finalizers;

    let updated = state.store.update(app).await?;
    info!(
        "Updated application {} (generation {})",
        updated.id(),
        updated.metadata.generation
    );
    api_ok!(updated)
}

/// Delete an application.
///
/// Applications still holding resources are marked for deletion and go
/// away once every zone has cleaned up.
///
/// # Endpoint
///
/// `DELETE /api/v0/applications/:namespace/:name`
pub async fn delete_application(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    debug!("Request: DELETE /api/v0/applications/{}/{}", namespace, name);

    let id = ApplicationId::new(namespace, name);
    state.store.delete(&id).await?;
    info!("Deleted application {}", id);
    api_ok!(())
}

/// Set the zones of an application with the `Global` placement strategy.
///
/// Only the owner zone decides placements; an application without an owner
/// is claimed by this zone.
///
/// # Endpoint
///
/// `PUT /api/v0/applications/:namespace/:name/placements`
///
/// # Errors
///
/// - 400 for a `Local` strategy application or an empty zone list
/// - 409 when another zone owns the application
pub async fn set_placements(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(request): Json<PlacementRequest>,
) -> Result<Json<ApiResponse<AnyApplication>>, ApiError> {
    debug!(
        "Request: PUT /api/v0/applications/{}/{}/placements",
        namespace, name
    );

    let mut zones: Vec<String> = Vec::new();
    for zone in request.zones.iter().map(|z| z.trim()) {
        if zone.is_empty() {
            return api_fail!("Zone names cannot be empty!");
        }
        if !zones.iter().any(|z| z == zone) {
            zones.push(zone.to_string());
        }
    }
    if zones.is_empty() {
        return api_fail!("At least one zone is required!");
    }

    let mut app = load(&state, &ApplicationId::new(namespace, name)).await?;
    if app.spec.placement_strategy.strategy != PlacementStrategy::Global {
        return api_fail!(format!(
            "{} uses the Local placement strategy, placements are decided by its owner",
            app.id()
        ));
    }
    let owner = app.status.owner.clone();
    if !owner.is_empty() && owner != state.zone {
        return Err(ApiError::conflict(format!(
            "{} is owned by zone {}, placements must be set there",
            app.id(),
            owner
        )));
    }

    let previous = app.status.clone();
    app.status.owner = state.zone.clone();
    app.status.placements = Some(zones.iter().map(Placement::new).collect());
    if !app.status.same_global_fields(&previous) {
        app.status.global_version += 1;
    }
    app.status.get_or_create_status_for(&state.zone);
    app.increment_zone_version(&state.zone);

    let updated = state.store.update_status(app).await?;
    info!("Placed {} in zone(s) {}", updated.id(), zones.join(", "));
    api_ok!(updated)
}

/// Ask for ownership of an application to move to this zone.
///
/// Records an `OwnershipTransfer` request; the controller then carries out
/// the transfer. Requesting ownership of an application this zone already
/// owns is a no-op.
///
/// # Endpoint
///
/// `POST /api/v0/applications/:namespace/:name/ownership`
pub async fn take_ownership(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<ApiResponse<AnyApplication>>, ApiError> {
    debug!(
        "Request: POST /api/v0/applications/{}/{}/ownership",
        namespace, name
    );

    let mut app = load(&state, &ApplicationId::new(namespace, name)).await?;
    if app.status.owner == state.zone {
        debug!("Zone {} already owns {}", state.zone, app.id());
        return api_ok!(app);
    }
    if app.is_being_deleted() {
        return Err(ApiError::conflict(format!("{} is being deleted", app.id())));
    }

    let condition = ConditionStatus::new(
        ApplicationConditionType::OwnershipTransfer,
        &state.zone,
        OwnershipTransferStatus::Pulling,
        Utc::now(),
    );
    if app.status.add_or_update(&condition, &state.zone) {
        app.increment_zone_version(&state.zone);
        app = state.store.update_status(app).await?;
        info!("Zone {} requested ownership of {}", state.zone, app.id());
    }
    api_ok!(app)
}
