//! API request handlers for the zone daemon REST API.
//!
//! # Handler Modules
//!
//! - [`info`] - System information and root endpoint
//! - [`applications`] - AnyApplication resources: CRUD, placements, ownership, export
//! - [`reports`] - Runtime status, resource footprint and events of an application
//!
//! All handlers take `State<AppState>` and return
//! `Result<Json<ApiResponse<T>>, ApiError>`, built with `api_ok!()` and
//! `api_fail!()`.

pub mod applications;
pub mod info;
pub mod reports;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::api::{create_router, AppState};
    use crate::zone::ZoneServices;
    use anyapp_core::{
        AnyApplication, AnyApplicationSpec, ApplicationMatcherSpec, Config, HelmSelectorSpec,
    };
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    pub const ZONE: &str = "zone-a";

    const MANIFEST: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: ${release}
spec:
  replicas: 2
  template:
    spec:
      containers:
        - name: main
          image: nginx
          resources:
            requests:
              cpu: 250m
              memory: 64Mi
"#;

    /// Router over a mock zone with an `nginx` 1.0.0 chart
    pub struct TestApp {
        pub services: ZoneServices,
        pub router: Router,
        _dir: TempDir,
    }

    impl TestApp {
        pub async fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let version_dir = dir.path().join("nginx").join("1.0.0");
            std::fs::create_dir_all(&version_dir).unwrap();
            std::fs::write(version_dir.join("deployment.yaml"), MANIFEST).unwrap();

            let mut config = Config::default();
            config.runtime.zone_id = ZONE.to_string();
            config.charts.directory = Some(dir.path().to_path_buf());

            let services = ZoneServices::build(&config, true).await.unwrap();
            let router = create_router(AppState::new(&services));
            Self {
                services,
                router,
                _dir: dir,
            }
        }

        pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let builder = Request::builder().method(method).uri(uri);
            let request = match body {
                Some(body) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let json = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, json)
        }

        pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
            self.send(Method::GET, uri, None).await
        }
    }

    pub fn nginx(name: &str) -> AnyApplication {
        AnyApplication::new(
            "default",
            name,
            AnyApplicationSpec {
                application: ApplicationMatcherSpec {
                    helm: Some(HelmSelectorSpec {
                        repository: "file://charts".to_string(),
                        chart: "nginx".to_string(),
                        version: "1.0.0".to_string(),
                        ..HelmSelectorSpec::default()
                    }),
                    ..ApplicationMatcherSpec::default()
                },
                ..AnyApplicationSpec::default()
            },
        )
    }

    pub fn to_json(app: &AnyApplication) -> Value {
        serde_json::to_value(app).unwrap()
    }
}
