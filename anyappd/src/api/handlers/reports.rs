//! Report handlers: runtime status, resource footprint and events

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::api_ok;
use anyapp_core::api::{ApiResponse, ApplicationReport, ApplicationSpecReport, EventRecord};
use anyapp_core::{AnyApplication, ApplicationId};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use tracing::debug;

/// Query parameters for the events endpoint
#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Only return the most recent `limit` events
    pub limit: Option<usize>,
}

async fn load(state: &AppState, namespace: String, name: String) -> Result<AnyApplication, ApiError> {
    let id = ApplicationId::new(namespace, name);
    state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("AnyApplication not found: {}", id)))
}

/// Runtime report of an application in this zone.
///
/// # Endpoint
///
/// `GET /api/v0/status/:namespace/:name`
///
/// # Returns
///
/// Workloads with their replica counts and health message, and pods with
/// phase, restarts and the tail of each container's log.
pub async fn get_status_report(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<ApiResponse<ApplicationReport>>, ApiError> {
    debug!("Request: GET /api/v0/status/{}/{}", namespace, name);

    let app = load(&state, namespace, name).await?;
    api_ok!(state.reports.report(&app).await?)
}

/// Requests, limits and storage of the rendered chart.
///
/// # Endpoint
///
/// `GET /api/v0/spec/:namespace/:name`
pub async fn get_spec_report(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<ApiResponse<ApplicationSpecReport>>, ApiError> {
    debug!("Request: GET /api/v0/spec/{}/{}", namespace, name);

    let app = load(&state, namespace, name).await?;
    api_ok!(state.reports.spec_report(&app).await?)
}

/// Events recorded for an application, oldest first.
///
/// # Endpoint
///
/// `GET /api/v0/events/:namespace/:name?limit=N`
pub async fn get_events(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<ApiResponse<Vec<EventRecord>>>, ApiError> {
    debug!("Request: GET /api/v0/events/{}/{}", namespace, name);

    let id = ApplicationId::new(namespace, name);
    let mut events = state.events.recent(&id);
    if events.is_empty() && state.store.get(&id).await?.is_none() {
        return Err(ApiError::not_found(format!("AnyApplication not found: {}", id)));
    }
    if let Some(limit) = query.limit {
        let skip = events.len().saturating_sub(limit);
        events.drain(..skip);
    }
    api_ok!(events)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{nginx, TestApp};
    use anyapp_controller::events::Event;
    use anyapp_controller::{ApplicationStore, Applications};
    use anyapp_core::SpecificVersion;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_missing_application() {
        let app = TestApp::new().await;
        for uri in [
            "/api/v0/status/default/ghost",
            "/api/v0/spec/default/ghost",
            "/api/v0/events/default/ghost",
        ] {
            let (status, _) = app.get(uri).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_spec_report() {
        let app = TestApp::new().await;
        app.services.store.create(nginx("web")).await.unwrap();

        let (status, body) = app.get("/api/v0/spec/default/web").await;
        assert_eq!(status, StatusCode::OK);
        let pods = body["data"]["pods"].as_array().unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0]["id"], "Deployment/web");
        assert_eq!(pods[0]["replica"], 2);
        assert_eq!(pods[0]["requests"]["cpu"], "250m");
        assert_eq!(pods[0]["requests"]["memory"], "64Mi");
    }

    #[tokio::test]
    async fn test_status_report_after_deploy() {
        let app = TestApp::new().await;
        let created = app.services.store.create(nginx("web")).await.unwrap();

        let (status, body) = app.get("/api/v0/status/default/web").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["workloads"].as_array().unwrap().is_empty());

        let version = SpecificVersion::parse("1.0.0").unwrap();
        app.services
            .applications
            .sync_version(&created, &version)
            .await
            .unwrap();

        let (status, body) = app.get("/api/v0/status/default/web").await;
        assert_eq!(status, StatusCode::OK);
        let workloads = body["data"]["workloads"].as_array().unwrap();
        assert_eq!(workloads.len(), 1);
        assert_eq!(workloads[0]["kind"], "Deployment");
        assert_eq!(workloads[0]["desired"], 2);
        assert_eq!(body["data"]["zone"], "zone-a");
    }

    #[tokio::test]
    async fn test_events_with_limit() {
        let app = TestApp::new().await;
        let created = app.services.store.create(nginx("web")).await.unwrap();
        for i in 0..5 {
            app.services
                .events
                .emit(&created.id(), &Event::global(format!("step {}", i)));
        }

        let (status, body) = app.get("/api/v0/events/default/web").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 5);

        let (status, body) = app.get("/api/v0/events/default/web?limit=2").await;
        assert_eq!(status, StatusCode::OK);
        let events = body["data"].as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["msg"], "step 3");
        assert_eq!(events[1]["reason"], "Global state change");
    }
}
