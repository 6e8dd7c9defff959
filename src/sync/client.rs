//! HTTP client for the field data server.
//!
//! Authentication is two-step: the configured api_key is exchanged for a
//! short-lived access token, which rides along as a bearer header. On a 401
//! the cached token is dropped and the request retried once with a fresh one.

use reqwest::Method;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use super::protocol::{
    BulkUploadResponse, InteractionBatchRequest, RemoteIndicator, RemoteOrganization,
    RemoteProject, RemoteTask, RemoteTerm, SearchPage, SingleUploadResponse, TokenResponse,
};
use crate::config::SyncConfig;

/// Errors that can occur talking to the server.
#[derive(Debug)]
pub enum ApiError {
    /// Sync is not configured
    NotConfigured,
    /// Failed to reach the server
    ConnectionError(String),
    /// Server answered with a non-success status
    StatusError { status: u16, body: String },
    /// Response body did not match the expected shape
    DecodeError(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::NotConfigured => write!(
                f,
                "Sync not configured. Add server_url and api_key to config."
            ),
            ApiError::ConnectionError(e) => write!(f, "Connection error: {}", e),
            ApiError::StatusError { status, body } => {
                write!(f, "Server returned status {}: {}", status, body)
            }
            ApiError::DecodeError(e) => write!(f, "Unexpected server response: {}", e),
        }
    }
}

impl std::error::Error for ApiError {}

/// Client for the server's HTTP API.
pub struct ApiClient {
    http: reqwest::Client,
    server_url: String,
    api_key: String,
    access_token: Mutex<Option<String>>,
}

impl ApiClient {
    /// Creates a client from config.
    ///
    /// Returns an error if sync is not configured.
    pub fn from_config(config: &SyncConfig) -> Result<Self, ApiError> {
        let server_url = config.server_url.clone().ok_or(ApiError::NotConfigured)?;
        let api_key = config.api_key.clone().ok_or(ApiError::NotConfigured)?;
        Ok(Self::new(server_url, api_key))
    }

    /// Creates a client with explicit parameters.
    pub fn new(server_url: String, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            server_url,
            api_key,
            access_token: Mutex::new(None),
        }
    }

    pub async fn upload_respondents_bulk(
        &self,
        aggregates: Vec<serde_json::Value>,
    ) -> Result<BulkUploadResponse, ApiError> {
        self.post_json("/respondents/bulk", &serde_json::Value::Array(aggregates))
            .await
    }

    pub async fn upload_respondent(
        &self,
        payload: &serde_json::Value,
    ) -> Result<SingleUploadResponse, ApiError> {
        self.post_json("/respondents", payload).await
    }

    /// Sends contact details separately from the public aggregate.
    pub async fn upload_private_info(
        &self,
        server_id: i64,
        payload: &serde_json::Value,
    ) -> Result<(), ApiError> {
        let path = format!("/respondents/{}/private", server_id);
        self.request(Method::POST, &path, Some(payload)).await?;
        Ok(())
    }

    pub async fn upload_interaction_batch(
        &self,
        batch: &InteractionBatchRequest,
    ) -> Result<(), ApiError> {
        let body =
            serde_json::to_value(batch).map_err(|e| ApiError::DecodeError(e.to_string()))?;
        self.request(Method::POST, "/interactions/batch", Some(&body))
            .await?;
        Ok(())
    }

    pub async fn fetch_tasks(&self) -> Result<Vec<RemoteTask>, ApiError> {
        self.get_json("/reference/tasks").await
    }

    pub async fn fetch_indicators(&self) -> Result<Vec<RemoteIndicator>, ApiError> {
        self.get_json("/reference/indicators").await
    }

    pub async fn fetch_organizations(&self) -> Result<Vec<RemoteOrganization>, ApiError> {
        self.get_json("/reference/organizations").await
    }

    pub async fn fetch_projects(&self) -> Result<Vec<RemoteProject>, ApiError> {
        self.get_json("/reference/projects").await
    }

    pub async fn fetch_vocabulary(&self) -> Result<Vec<RemoteTerm>, ApiError> {
        self.get_json("/reference/vocabulary").await
    }

    /// Searches respondents the server knows about. Pages start at 1.
    pub async fn search_respondents(&self, term: &str, page: u32) -> Result<SearchPage, ApiError> {
        let path = format!(
            "/respondents?search={}&page={}",
            urlencoding::encode(term),
            page
        );
        self.get_json(&path).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.request(Method::GET, path, None).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::DecodeError(e.to_string()))
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ApiError> {
        let response = self.request(Method::POST, path, Some(body)).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::DecodeError(e.to_string()))
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, ApiError> {
        let url = self.build_url(path);
        let mut refreshed = false;
        loop {
            let token = self.bearer_token().await?;
            let mut request = self
                .http
                .request(method.clone(), &url)
                .header("Authorization", format!("Bearer {}", token));
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request
                .send()
                .await
                .map_err(|e| ApiError::ConnectionError(e.to_string()))?;

            if response.status() == reqwest::StatusCode::UNAUTHORIZED && !refreshed {
                // Cached token may have expired server-side.
                self.access_token.lock().await.take();
                refreshed = true;
                continue;
            }
            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(ApiError::StatusError { status, body });
            }
            return Ok(response);
        }
    }

    /// Returns the cached access token, exchanging the api key for a fresh
    /// one on first use.
    async fn bearer_token(&self) -> Result<String, ApiError> {
        let mut cached = self.access_token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let url = self.build_url("/auth/token");
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({"api_key": self.api_key}))
            .send()
            .await
            .map_err(|e| ApiError::ConnectionError(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::StatusError { status, body });
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ApiError::DecodeError(e.to_string()))?;

        *cached = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    /// Builds a full URL for an API path.
    fn build_url(&self, path: &str) -> String {
        // Prepend a scheme for bare host:port values
        let base_url = if !self.server_url.starts_with("http://")
            && !self.server_url.starts_with("https://")
        {
            format!("http://{}", self.server_url)
        } else {
            self.server_url.clone()
        };

        format!("{}{}", base_url.trim_end_matches('/'), path)
    }
}

/// Probes the server's health endpoint with a short timeout, so offline
/// sessions skip sync work quickly.
pub async fn check_server(server_url: &str) -> bool {
    let base_url = if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
        format!("http://{}", server_url)
    } else {
        server_url.to_string()
    };
    let url = format!("{}/health", base_url.trim_end_matches('/'));

    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(3))
        .build()
    {
        Ok(client) => client,
        Err(_) => return false,
    };
    match client.get(&url).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testutil::spawn_server;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_build_url_with_http() {
        let client = ApiClient::new("http://localhost:8080".to_string(), "key".to_string());
        assert_eq!(
            client.build_url("/reference/tasks"),
            "http://localhost:8080/reference/tasks"
        );
    }

    #[test]
    fn test_build_url_trims_trailing_slash() {
        let client = ApiClient::new("https://field.example.org/".to_string(), "key".to_string());
        assert_eq!(
            client.build_url("/health"),
            "https://field.example.org/health"
        );
    }

    #[test]
    fn test_build_url_bare_host() {
        let client = ApiClient::new("localhost:8080".to_string(), "key".to_string());
        assert_eq!(client.build_url("/health"), "http://localhost:8080/health");
    }

    #[tokio::test]
    async fn test_token_fetched_once_and_attached() {
        let token_calls = Arc::new(AtomicUsize::new(0));
        let seen_auth = Arc::new(std::sync::Mutex::new(Vec::new()));

        let token_counter = token_calls.clone();
        let auth_log = seen_auth.clone();
        let app = Router::new()
            .route(
                "/auth/token",
                post(move |Json(body): Json<serde_json::Value>| {
                    let token_counter = token_counter.clone();
                    async move {
                        assert_eq!(body["api_key"], "secret");
                        token_counter.fetch_add(1, Ordering::SeqCst);
                        Json(serde_json::json!({"access_token": "tok-1"}))
                    }
                }),
            )
            .route(
                "/reference/tasks",
                get(move |headers: HeaderMap| {
                    let auth_log = auth_log.clone();
                    async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string();
                        auth_log.lock().unwrap().push(auth);
                        Json(serde_json::json!([]))
                    }
                }),
            );
        let url = spawn_server(app).await;

        let client = ApiClient::new(url, "secret".to_string());
        assert!(client.fetch_tasks().await.unwrap().is_empty());
        assert!(client.fetch_tasks().await.unwrap().is_empty());

        assert_eq!(token_calls.load(Ordering::SeqCst), 1);
        let seen = seen_auth.lock().unwrap();
        assert_eq!(seen.as_slice(), ["Bearer tok-1", "Bearer tok-1"]);
    }

    #[tokio::test]
    async fn test_expired_token_refreshed_and_retried_once() {
        let token_calls = Arc::new(AtomicUsize::new(0));
        let data_calls = Arc::new(AtomicUsize::new(0));

        let token_counter = token_calls.clone();
        let data_counter = data_calls.clone();
        let app = Router::new()
            .route(
                "/auth/token",
                post(move || {
                    let token_counter = token_counter.clone();
                    async move {
                        let n = token_counter.fetch_add(1, Ordering::SeqCst) + 1;
                        Json(serde_json::json!({"access_token": format!("tok-{}", n)}))
                    }
                }),
            )
            .route(
                "/reference/tasks",
                get(move |headers: HeaderMap| {
                    let data_counter = data_counter.clone();
                    async move {
                        data_counter.fetch_add(1, Ordering::SeqCst);
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("");
                        if auth == "Bearer tok-2" {
                            (StatusCode::OK, Json(serde_json::json!([])))
                        } else {
                            (
                                StatusCode::UNAUTHORIZED,
                                Json(serde_json::json!({"error": "token expired"})),
                            )
                        }
                    }
                }),
            );
        let url = spawn_server(app).await;

        let client = ApiClient::new(url, "secret".to_string());
        assert!(client.fetch_tasks().await.unwrap().is_empty());

        assert_eq!(token_calls.load(Ordering::SeqCst), 2);
        assert_eq!(data_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_persistent_unauthorized_is_an_error() {
        let app = Router::new()
            .route(
                "/auth/token",
                post(|| async { Json(serde_json::json!({"access_token": "tok"})) }),
            )
            .route(
                "/reference/tasks",
                get(|| async { (StatusCode::UNAUTHORIZED, "bad key") }),
            );
        let url = spawn_server(app).await;

        let client = ApiClient::new(url, "secret".to_string());
        let result = client.fetch_tasks().await;
        assert!(matches!(
            result,
            Err(ApiError::StatusError { status: 401, .. })
        ));
    }

    #[tokio::test]
    async fn test_server_error_carries_status_and_body() {
        let app = Router::new()
            .route(
                "/auth/token",
                post(|| async { Json(serde_json::json!({"access_token": "tok"})) }),
            )
            .route(
                "/reference/tasks",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "backend down") }),
            );
        let url = spawn_server(app).await;

        let client = ApiClient::new(url, "secret".to_string());
        match client.fetch_tasks().await {
            Err(ApiError::StatusError { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "backend down");
            }
            other => panic!("expected status error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_search_encodes_term() {
        let seen = Arc::new(std::sync::Mutex::new(String::new()));

        let seen_query = seen.clone();
        let app = Router::new()
            .route(
                "/auth/token",
                post(|| async { Json(serde_json::json!({"access_token": "tok"})) }),
            )
            .route(
                "/respondents",
                get(
                    move |axum::extract::RawQuery(query): axum::extract::RawQuery| {
                        let seen_query = seen_query.clone();
                        async move {
                            *seen_query.lock().unwrap() = query.unwrap_or_default();
                            Json(serde_json::json!({"results": [], "has_more": false}))
                        }
                    },
                ),
            );
        let url = spawn_server(app).await;

        let client = ApiClient::new(url, "secret".to_string());
        let page = client.search_respondents("a b&c", 2).await.unwrap();
        assert!(page.results.is_empty());
        assert_eq!(*seen.lock().unwrap(), "search=a%20b%26c&page=2");
    }

    #[tokio::test]
    async fn test_check_server() {
        let app = Router::new().route("/health", get(|| async { "ok" }));
        let url = spawn_server(app).await;

        assert!(check_server(&url).await);
        assert!(!check_server("http://127.0.0.1:1").await);
    }

    #[test]
    fn test_from_config_requires_url_and_key() {
        let incomplete = SyncConfig {
            server_url: Some("http://localhost:8080".to_string()),
            api_key: None,
            auto_sync: false,
        };
        assert!(matches!(
            ApiClient::from_config(&incomplete),
            Err(ApiError::NotConfigured)
        ));
    }
}
