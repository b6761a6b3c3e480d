//! Info handlers for system information and root endpoint

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::api_ok;

use anyapp_core::api::{ApiResponse, InfoResponse};
use axum::{extract::State, Json};
use serde_json::{json, Value};
use tracing::debug;

/// Handle the root endpoint.
///
/// Provide basic service identification. Useful for health checks and
/// verifying the API is accessible.
///
/// # Endpoint
///
/// `GET /`
pub(crate) async fn root(State(state): State<AppState>) -> Result<Json<ApiResponse<Value>>, ApiError> {
    debug!("Request: GET /");

    let data = json!({
        "service": "AnyApplication zone daemon",
        "version": env!("CARGO_PKG_VERSION"),
        "zone": state.zone,
        "status": "ok"
    });

    api_ok!(data)
}

/// Retrieve information about this zone daemon.
///
/// # Endpoint
///
/// `GET /api/v0/info`
///
/// # Returns
///
/// - `version` - Server version
/// - `zone` - Zone id of this daemon
/// - `uptime` - Server uptime in seconds
/// - `peers` - Configured peer daemon URLs
/// - `mock` - Whether the in-memory cluster is used
/// - `applications` - Number of applications in the store
/// - `running_jobs` - Number of async jobs in flight
pub(crate) async fn get_info(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<InfoResponse>>, ApiError> {
    debug!("Request: GET /api/v0/info");

    let applications = state.store.list().await?.len();

    let info_response = InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        zone: state.zone.clone(),
        uptime: state.start_time.elapsed().as_secs(),
        peers: state.peers.as_ref().clone(),
        mock: state.mock,
        applications,
        running_jobs: state.jobs.len(),
    };

    api_ok!(info_response)
}
