//! REST API of the zone daemon
//!
//! Contains the Axum router, shared state and the error type returned by
//! every handler.

pub(crate) mod handlers;

use crate::zone::ZoneServices;
use anyapp_controller::{ApplicationStore, Events, Jobs, Reports};
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Application state shared across all handlers
#[derive(Clone)]
pub(crate) struct AppState {
    pub store: Arc<dyn ApplicationStore>,
    pub reports: Arc<Reports>,
    pub events: Arc<dyn Events>,
    pub jobs: Arc<Jobs>,
    /// Zone this daemon runs in
    pub zone: String,
    /// Peer daemon URLs, as configured
    pub peers: Arc<Vec<String>>,
    /// Running against the in-memory cluster
    pub mock: bool,
    /// Server start time for uptime calculation
    pub start_time: Instant,
}

impl AppState {
    pub fn new(services: &ZoneServices) -> Self {
        Self {
            store: services.store.clone(),
            reports: services.reports.clone(),
            events: services.events.clone(),
            jobs: services.jobs.clone(),
            zone: services.zone.clone(),
            peers: Arc::new(services.peer_urls.clone()),
            mock: services.mock,
            start_time: Instant::now(),
        }
    }
}

/// Create the main API router with all endpoints
pub(crate) fn create_router(state: AppState) -> Router {
    info!("Setting up API router...");

    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(tower_http::cors::Any);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024)); // 1MB limit

    Router::new()
        // Application resources
        .route(
            "/api/v0/applications",
            get(handlers::applications::list_applications)
                .post(handlers::applications::create_application),
        )
        .route(
            "/api/v0/applications/export",
            get(handlers::applications::export_applications),
        )
        .route(
            "/api/v0/applications/:namespace/:name",
            get(handlers::applications::get_application)
                .put(handlers::applications::update_application)
                .delete(handlers::applications::delete_application),
        )
        .route(
            "/api/v0/applications/:namespace/:name/placements",
            put(handlers::applications::set_placements),
        )
        .route(
            "/api/v0/applications/:namespace/:name/ownership",
            post(handlers::applications::take_ownership),
        )
        // Reports
        .route(
            "/api/v0/status/:namespace/:name",
            get(handlers::reports::get_status_report),
        )
        .route(
            "/api/v0/spec/:namespace/:name",
            get(handlers::reports::get_spec_report),
        )
        .route(
            "/api/v0/events/:namespace/:name",
            get(handlers::reports::get_events),
        )
        // System info endpoint
        .route("/api/v0/info", get(handlers::info::get_info))
        // Root endpoint
        .route("/", get(handlers::info::root))
        .layer(middleware_stack)
        .with_state(state)
}

/// Error handling utilities
pub(crate) mod error {
    use anyapp_core::api::ApiResponse;
    use anyapp_core::AnyAppError;
    use axum::{
        http::StatusCode,
        response::{IntoResponse, Response},
        Json,
    };

    use tracing::{error, warn};

    /// Custom error type for API responses
    #[derive(Debug)]
    pub struct ApiError {
        pub status_code: StatusCode,
        pub message: String,
    }

    impl ApiError {
        pub fn new(status_code: StatusCode, message: impl Into<String>) -> Self {
            Self {
                status_code,
                message: message.into(),
            }
        }

        pub fn bad_request(message: impl Into<String>) -> Self {
            Self::new(StatusCode::BAD_REQUEST, message)
        }

        pub fn not_found(message: impl Into<String>) -> Self {
            Self::new(StatusCode::NOT_FOUND, message)
        }

        pub fn conflict(message: impl Into<String>) -> Self {
            Self::new(StatusCode::CONFLICT, message)
        }

        pub fn internal_error(message: impl Into<String>) -> Self {
            Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
        }

        /// Cluster, chart repository or peer zone not reachable
        pub fn service_unavailable(message: impl Into<String>) -> Self {
            Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
        }
    }

    impl IntoResponse for ApiError {
        fn into_response(self) -> Response {
            if self.status_code.is_server_error() {
                error!("API Error {}: {}", self.status_code, self.message);
            } else {
                warn!("API Error {}: {}", self.status_code, self.message);
            }

            let response: ApiResponse<()> = ApiResponse::error(self.message);

            (self.status_code, Json(response)).into_response()
        }
    }

    impl From<AnyAppError> for ApiError {
        fn from(err: AnyAppError) -> Self {
            let message = err.to_string();
            match err {
                AnyAppError::NotFound { .. } => Self::not_found(message),
                AnyAppError::AlreadyExists(_) | AnyAppError::Conflict { .. } => {
                    Self::conflict(message)
                }
                AnyAppError::InvalidInput(_) | AnyAppError::InvalidVersion(_) => {
                    Self::bad_request(message)
                }
                AnyAppError::Cluster(_)
                | AnyAppError::Chart(_)
                | AnyAppError::Peer(_)
                | AnyAppError::Timeout(_) => Self::service_unavailable(message),
                _ => Self::internal_error(message),
            }
        }
    }
}

/// Helper macros for common responses
#[macro_export]
macro_rules! api_ok {
    ($data:expr) => {
        Ok(axum::Json(anyapp_core::api::ApiResponse::success($data)))
    };
}

#[macro_export]
macro_rules! api_fail {
    ($message:expr) => {
        Err($crate::api::error::ApiError::bad_request($message))
    };
}
