//! HTTP client for communicating with the AnyApplication zone daemon.

use anyapp_core::api::{
    ApiResponse, ApplicationReport, ApplicationSpecReport, ApplicationSummary, EventRecord,
    InfoResponse, PlacementRequest,
};
use anyapp_core::{AnyApplication, ApplicationId};
use anyhow::{Context, Result};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Normalize a server URL by removing trailing slashes.
fn normalize_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// `namespace/name` with both segments escaped for use in a URL path
fn application_path(id: &ApplicationId) -> String {
    format!(
        "{}/{}",
        urlencoding::encode(&id.namespace),
        urlencoding::encode(&id.name)
    )
}

/// Failure reported by the daemon
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{endpoint}: {message}")]
    Api {
        endpoint: String,
        status: StatusCode,
        message: String,
    },
}

impl ClientError {
    pub fn status(&self) -> StatusCode {
        match self {
            ClientError::Api { status, .. } => *status,
        }
    }

    /// True when `err` is a 404 from the daemon
    pub fn is_not_found(err: &anyhow::Error) -> bool {
        err.downcast_ref::<ClientError>()
            .map(|e| e.status() == StatusCode::NOT_FOUND)
            .unwrap_or(false)
    }
}

/// HTTP client for the zone daemon's REST API.
///
/// Reads are retried on connection failures and timeouts with a delay that
/// grows linearly with each attempt. Writes are sent once. HTTP errors are
/// never retried.
///
/// # Examples
///
/// ```no_run
/// use anyappctl::client::AnyAppClient;
/// use std::time::Duration;
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = AnyAppClient::with_config(
///     "http://127.0.0.1:8090".to_string(),
///     10,  // timeout in seconds
///     3,   // max retries
///     Duration::from_millis(500),  // retry delay
/// )?;
///
/// let info = client.get_info().await?;
/// println!("Zone {} runs version {}", info.zone, info.version);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AnyAppClient {
    client: Client,
    base_url: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl AnyAppClient {
    /// Create a client for the daemon at `server_url`.
    ///
    /// # Arguments
    ///
    /// * `server_url` - Base URL of the daemon (e.g., "http://127.0.0.1:8090")
    /// * `timeout_secs` - Request timeout in seconds
    /// * `max_retries` - Retries for reads that fail to connect
    /// * `retry_delay` - Delay before the first retry
    pub fn with_config(
        server_url: String,
        timeout_secs: u64,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("anyappctl/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: normalize_url(&server_url),
            max_retries,
            retry_delay,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Process an HTTP response and extract the API data.
    ///
    /// Non-success statuses become a [`ClientError`] carrying the daemon's
    /// error message when the body has one.
    async fn handle_response<T: DeserializeOwned>(response: Response, endpoint: &str) -> Result<T> {
        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from {}", endpoint))?;

        if !status.is_success() {
            let detail = match serde_json::from_str::<ApiResponse<serde_json::Value>>(&text) {
                Ok(ApiResponse::Error { error }) => error,
                _ => text,
            };
            let message = match status {
                StatusCode::NOT_FOUND => format!("not found ({})", detail),
                StatusCode::CONFLICT => format!("conflict: {}", detail),
                StatusCode::BAD_REQUEST => format!("bad request: {}", detail),
                StatusCode::SERVICE_UNAVAILABLE => format!("service unavailable: {}", detail),
                StatusCode::INTERNAL_SERVER_ERROR => format!("server error: {}", detail),
                _ => format!("HTTP {}: {}", status, detail),
            };
            return Err(ClientError::Api {
                endpoint: endpoint.to_string(),
                status,
                message,
            }
            .into());
        }

        let api_response: ApiResponse<T> = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse JSON response from {}", endpoint))?;

        match api_response {
            ApiResponse::Success { data } => Ok(data),
            ApiResponse::Error { error } => {
                Err(anyhow::anyhow!("Server error at {}: {}", endpoint, error))
            }
        }
    }

    /// Execute an HTTP request, retrying connection failures.
    async fn execute_with_retry<F, Fut, T>(&self, endpoint: &str, request_fn: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<Response, reqwest::Error>>,
        T: DeserializeOwned,
    {
        let mut attempt = 0;
        loop {
            match request_fn().await {
                Ok(response) => return Self::handle_response(response, endpoint).await,
                Err(e) => {
                    let should_retry = e.is_connect() || e.is_timeout() || e.is_request();
                    if attempt < self.max_retries && should_retry {
                        attempt += 1;
                        tokio::time::sleep(self.retry_delay * attempt).await;
                        continue;
                    }
                    return Err(anyhow::anyhow!(
                        "Failed to reach {} at {} after {} attempt(s): {}",
                        endpoint,
                        self.base_url,
                        attempt + 1,
                        e
                    ));
                }
            }
        }
    }

    /// Send a request once.
    async fn execute_once<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", endpoint))?;
        Self::handle_response(response, endpoint).await
    }

    /// Retrieve daemon information.
    pub async fn get_info(&self) -> Result<InfoResponse> {
        let url = format!("{}/api/v0/info", self.base_url);
        self.execute_with_retry("info", || self.client.get(&url).send())
            .await
    }

    pub async fn list_applications(&self) -> Result<Vec<ApplicationSummary>> {
        let url = format!("{}/api/v0/applications", self.base_url);
        self.execute_with_retry("applications", || self.client.get(&url).send())
            .await
    }

    pub async fn get_application(&self, id: &ApplicationId) -> Result<AnyApplication> {
        let url = format!("{}/api/v0/applications/{}", self.base_url, application_path(id));
        let endpoint = &format!("applications/{}", id);
        self.execute_with_retry(endpoint, || self.client.get(&url).send())
            .await
    }

    pub async fn create_application(&self, app: &AnyApplication) -> Result<AnyApplication> {
        let url = format!("{}/api/v0/applications", self.base_url);
        self.execute_once("applications", self.client.post(&url).json(app))
            .await
    }

    /// Replace the spec of an existing application.
    ///
    /// A resource version of 0 in `app` overwrites whatever is stored.
    pub async fn update_application(&self, app: &AnyApplication) -> Result<AnyApplication> {
        let id = app.id();
        let url = format!("{}/api/v0/applications/{}", self.base_url, application_path(&id));
        let endpoint = &format!("applications/{}", id);
        self.execute_once(endpoint, self.client.put(&url).json(app))
            .await
    }

    /// Create the application, or update it when it already exists.
    ///
    /// Returns the stored resource and whether it was created.
    pub async fn apply_application(&self, app: &AnyApplication) -> Result<(AnyApplication, bool)> {
        match self.get_application(&app.id()).await {
            Ok(_) => Ok((self.update_application(app).await?, false)),
            Err(e) if ClientError::is_not_found(&e) => {
                Ok((self.create_application(app).await?, true))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn delete_application(&self, id: &ApplicationId) -> Result<()> {
        let url = format!("{}/api/v0/applications/{}", self.base_url, application_path(id));
        let endpoint = &format!("applications/{}", id);
        self.execute_once(endpoint, self.client.delete(&url))
            .await
    }

    /// Set the zones of a `Global` strategy application.
    pub async fn set_placements(
        &self,
        id: &ApplicationId,
        zones: Vec<String>,
    ) -> Result<AnyApplication> {
        if zones.is_empty() {
            return Err(anyhow::anyhow!("At least one zone is required"));
        }
        let url = format!(
            "{}/api/v0/applications/{}/placements",
            self.base_url,
            application_path(id)
        );
        let endpoint = &format!("applications/{}/placements", id);
        let request = PlacementRequest { zones };
        self.execute_once(endpoint, self.client.put(&url).json(&request))
            .await
    }

    /// Request ownership of an application for the daemon's zone.
    pub async fn take_ownership(&self, id: &ApplicationId) -> Result<AnyApplication> {
        let url = format!(
            "{}/api/v0/applications/{}/ownership",
            self.base_url,
            application_path(id)
        );
        let endpoint = &format!("applications/{}/ownership", id);
        self.execute_once(endpoint, self.client.post(&url))
            .await
    }

    pub async fn status_report(&self, id: &ApplicationId) -> Result<ApplicationReport> {
        let url = format!("{}/api/v0/status/{}", self.base_url, application_path(id));
        let endpoint = &format!("status/{}", id);
        self.execute_with_retry(endpoint, || self.client.get(&url).send())
            .await
    }

    pub async fn spec_report(&self, id: &ApplicationId) -> Result<ApplicationSpecReport> {
        let url = format!("{}/api/v0/spec/{}", self.base_url, application_path(id));
        let endpoint = &format!("spec/{}", id);
        self.execute_with_retry(endpoint, || self.client.get(&url).send())
            .await
    }

    pub async fn events(&self, id: &ApplicationId, limit: Option<usize>) -> Result<Vec<EventRecord>> {
        let mut url = format!("{}/api/v0/events/{}", self.base_url, application_path(id));
        if let Some(limit) = limit {
            url.push_str(&format!("?limit={}", limit));
        }
        let endpoint = &format!("events/{}", id);
        self.execute_with_retry(endpoint, || self.client.get(&url).send())
            .await
    }

    /// Test basic connectivity to the server.
    ///
    /// Returns `false` instead of an error when the server cannot be reached.
    pub async fn ping(&self) -> Result<bool> {
        let url = format!("{}/", self.base_url);

        let client = Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .context("Failed to create ping client")?;

        match client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Check connectivity and the info endpoint.
    ///
    /// # Returns
    ///
    /// - `connected` - Whether the server is reachable
    /// - `ping_ms` - Response time in milliseconds
    /// - `api_working` - Whether the info endpoint answers (if connected)
    /// - `zone`, `server_version`, `applications`, `running_jobs` (if the API works)
    /// - `api_error` - Error message if the info endpoint fails
    pub async fn health_check(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        use serde_json::Value;

        let mut health = BTreeMap::new();

        let ping_start = std::time::Instant::now();
        let ping_success = self.ping().await?;
        let ping_duration = ping_start.elapsed();

        health.insert("connected".to_string(), Value::Bool(ping_success));
        health.insert(
            "ping_ms".to_string(),
            Value::from(ping_duration.as_millis() as u64),
        );

        if ping_success {
            match self.get_info().await {
                Ok(info) => {
                    health.insert("api_working".to_string(), Value::Bool(true));
                    health.insert("zone".to_string(), Value::String(info.zone));
                    health.insert("server_version".to_string(), Value::String(info.version));
                    health.insert("applications".to_string(), Value::from(info.applications));
                    health.insert("running_jobs".to_string(), Value::from(info.running_jobs));
                }
                Err(e) => {
                    health.insert("api_working".to_string(), Value::Bool(false));
                    health.insert("api_error".to_string(), Value::String(e.to_string()));
                }
            }
        }

        Ok(health)
    }
}
