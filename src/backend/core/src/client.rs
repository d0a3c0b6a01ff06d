//! HTTP client for the document-storage provider's REST API.
//!
//! One place owns request formatting, bearer-token auth, and error
//! classification so every caller sees the same taxonomy:
//!
//! - 429 → [`ErrorCode::UpstreamRateLimited`] (retryable)
//! - 5xx → [`ErrorCode::UpstreamUnavailable`] (retryable)
//! - network / timeout → [`ErrorCode::NetworkError`] / [`ErrorCode::Timeout`]
//! - 401 → refresh credentials and replay once; a second 401 is terminal
//! - any other 4xx → [`ErrorCode::UpstreamRejected`] (terminal)
//!
//! The client performs no backoff of its own; retry policy is composed
//! around it explicitly (see `context.rs`). The single inline 401 replay is
//! a credential concern, not a transient-failure concern.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::UpstreamConfig;
use crate::error::{CoreError, ErrorCode, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Token Provider
// ═══════════════════════════════════════════════════════════════════════════════

/// Source of bearer tokens for the provider API.
///
/// `refresh` is invoked when the provider answers 401; implementations
/// re-authenticate however their auth flow requires.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token.
    async fn access_token(&self) -> Result<String>;

    /// Obtain fresh credentials after a 401.
    async fn refresh(&self) -> Result<()>;
}

/// Token provider holding a fixed token (developer tokens, tests).
pub struct StaticTokenProvider {
    token: RwLock<String>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(token.into()),
        }
    }

    /// Replace the held token.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = token.into();
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        Ok(self.token.read().clone())
    }

    async fn refresh(&self) -> Result<()> {
        // A static token cannot be refreshed; the replayed request will
        // surface the terminal auth failure.
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Client Metrics
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Clone, Serialize)]
struct EndpointStats {
    requests: u64,
    successes: u64,
    failures: u64,
    total_time_secs: f64,
}

#[derive(Debug, Default)]
struct ClientStats {
    requests: u64,
    successes: u64,
    failures: u64,
    total_time: Duration,
    endpoints: HashMap<String, EndpointStats>,
}

/// Metrics snapshot for the API client.
#[derive(Debug, Clone, Serialize)]
pub struct ClientMetrics {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_time_secs: f64,
    pub avg_time_secs: f64,
    pub endpoints: HashMap<String, Value>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Extraction Spec
// ═══════════════════════════════════════════════════════════════════════════════

/// What to ask the provider's AI endpoint for.
#[derive(Debug, Clone)]
pub enum ExtractionSpec {
    /// Freeform extraction driven by a prompt
    Freeform { prompt: String },
    /// Structured extraction driven by field definitions
    Structured { fields: Vec<Value> },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Storage Client
// ═══════════════════════════════════════════════════════════════════════════════

/// Client for the document-storage provider's REST API.
pub struct StorageClient {
    http: reqwest::Client,
    base_url: String,
    auth: Arc<dyn TokenProvider>,
    stats: Mutex<ClientStats>,
}

impl StorageClient {
    /// Create a client against the configured base URL.
    pub fn new(config: UpstreamConfig, auth: Arc<dyn TokenProvider>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth,
            stats: Mutex::new(ClientStats::default()),
        })
    }

    /// Make a single API call with consistent auth and error handling.
    ///
    /// On a 401 the token provider is refreshed and the request replayed
    /// once; every other non-success status maps straight into the error
    /// taxonomy. An empty success body yields `{"success": true}`.
    pub async fn call_api(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
        query: Option<&[(&str, String)]>,
    ) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        let endpoint_key = endpoint_key(endpoint);
        let started = Instant::now();
        let mut refreshed = false;

        loop {
            let token = self.auth.access_token().await?;

            let mut request = self.http.request(method.clone(), &url).bearer_auth(token);
            if let Some(query) = query {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    let err: CoreError = err.into();
                    self.record(&endpoint_key, false, started.elapsed());
                    err.log();
                    return Err(err);
                }
            };

            let status = response.status();

            if status.is_success() {
                let bytes = response.bytes().await.map_err(CoreError::from)?;
                let value = if bytes.is_empty() {
                    json!({"success": true})
                } else {
                    serde_json::from_slice(&bytes).map_err(|e| {
                        CoreError::with_internal(
                            ErrorCode::DeserializationError,
                            "Upstream returned a malformed response",
                            e.to_string(),
                        )
                    })?
                };

                self.record(&endpoint_key, true, started.elapsed());
                debug!(endpoint = %endpoint_key, status = status.as_u16(), "API call succeeded");
                return Ok(value);
            }

            if status == StatusCode::UNAUTHORIZED && !refreshed {
                // Token may simply have expired; refresh and replay once.
                warn!(endpoint = %endpoint_key, "Received 401, refreshing credentials");
                refreshed = true;
                self.auth.refresh().await?;
                continue;
            }

            let detail = response.text().await.unwrap_or_default();
            let err = classify_status(status, endpoint, &detail);
            self.record(&endpoint_key, false, started.elapsed());
            err.log();
            return Err(err);
        }
    }

    fn record(&self, endpoint_key: &str, success: bool, elapsed: Duration) {
        let mut stats = self.stats.lock();
        stats.requests += 1;
        stats.total_time += elapsed;
        if success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
        }

        let entry = stats.endpoints.entry(endpoint_key.to_string()).or_default();
        entry.requests += 1;
        entry.total_time_secs += elapsed.as_secs_f64();
        if success {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
    }

    /// Per-endpoint call metrics.
    pub fn metrics(&self) -> ClientMetrics {
        let stats = self.stats.lock();
        let avg_time_secs = if stats.requests > 0 {
            stats.total_time.as_secs_f64() / stats.requests as f64
        } else {
            0.0
        };

        ClientMetrics {
            requests: stats.requests,
            successes: stats.successes,
            failures: stats.failures,
            total_time_secs: stats.total_time.as_secs_f64(),
            avg_time_secs,
            endpoints: stats
                .endpoints
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::to_value(v).unwrap_or(Value::Null)))
                .collect(),
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Typed operations
    // ───────────────────────────────────────────────────────────────────────────

    /// Get information about a file.
    pub async fn get_file_info(&self, file_id: &str, fields: Option<&[&str]>) -> Result<Value> {
        let query = fields.map(|f| vec![("fields", f.join(","))]);
        self.call_api(
            Method::GET,
            &format!("files/{file_id}"),
            None,
            query.as_deref(),
        )
        .await
    }

    /// List the items in a folder.
    pub async fn get_folder_items(
        &self,
        folder_id: &str,
        limit: u32,
        offset: u32,
        fields: Option<&[&str]>,
    ) -> Result<Value> {
        let mut query = vec![("limit", limit.to_string()), ("offset", offset.to_string())];
        if let Some(fields) = fields {
            query.push(("fields", fields.join(",")));
        }
        self.call_api(
            Method::GET,
            &format!("folders/{folder_id}/items"),
            None,
            Some(&query),
        )
        .await
    }

    /// List metadata templates in a scope.
    pub async fn get_metadata_templates(&self, scope: &str) -> Result<Value> {
        self.call_api(Method::GET, &format!("metadata_templates/{scope}"), None, None)
            .await
    }

    /// Get one metadata template's schema.
    pub async fn get_metadata_template(&self, scope: &str, template_key: &str) -> Result<Value> {
        self.call_api(
            Method::GET,
            &format!("metadata_templates/{scope}/{template_key}/schema"),
            None,
            None,
        )
        .await
    }

    /// Ask the provider's AI endpoint to extract metadata from a file.
    pub async fn extract_metadata(&self, file_id: &str, spec: &ExtractionSpec) -> Result<Value> {
        let items = json!([{"id": file_id, "type": "file"}]);
        let (endpoint, body) = match spec {
            ExtractionSpec::Freeform { prompt } => (
                "ai/extract",
                json!({"prompt": prompt, "items": items}),
            ),
            ExtractionSpec::Structured { fields } => (
                "ai/extract_structured",
                json!({"fields": fields, "items": items}),
            ),
        };
        self.call_api(Method::POST, endpoint, Some(&body), None).await
    }

    /// Attach metadata values to a file under a template.
    pub async fn apply_metadata(
        &self,
        file_id: &str,
        values: &Value,
        scope: &str,
        template_key: &str,
    ) -> Result<Value> {
        self.call_api(
            Method::POST,
            &format!("files/{file_id}/metadata/{scope}/{template_key}"),
            Some(values),
            None,
        )
        .await
    }

    /// Update existing file metadata with JSON-patch style operations.
    pub async fn update_metadata(
        &self,
        file_id: &str,
        operations: &[Value],
        scope: &str,
        template_key: &str,
    ) -> Result<Value> {
        let body = Value::Array(operations.to_vec());
        self.call_api(
            Method::PUT,
            &format!("files/{file_id}/metadata/{scope}/{template_key}"),
            Some(&body),
            None,
        )
        .await
    }
}

/// Map an HTTP error status into the crate taxonomy.
fn classify_status(status: StatusCode, endpoint: &str, detail: &str) -> CoreError {
    let internal = format!(
        "HTTP {} from {}: {}",
        status.as_u16(),
        endpoint,
        detail.chars().take(500).collect::<String>()
    );

    match status {
        StatusCode::TOO_MANY_REQUESTS => CoreError::with_internal(
            ErrorCode::UpstreamRateLimited,
            "Rate limited by the document service",
            internal,
        ),
        StatusCode::UNAUTHORIZED => CoreError::with_internal(
            ErrorCode::AuthFailed,
            "Authentication with the document service failed",
            internal,
        ),
        s if s.is_server_error() => CoreError::with_internal(
            ErrorCode::UpstreamUnavailable,
            "Document service is unavailable",
            internal,
        ),
        s if s.is_client_error() => CoreError::with_internal(
            ErrorCode::UpstreamRejected,
            "Document service rejected the request",
            internal,
        ),
        _ => CoreError::with_internal(
            ErrorCode::Internal,
            "Unexpected response from the document service",
            internal,
        ),
    }
}

/// Base endpoint for metrics grouping: first path segment, query stripped.
fn endpoint_key(endpoint: &str) -> String {
    endpoint
        .trim_start_matches('/')
        .split('?')
        .next()
        .unwrap_or("")
        .split('/')
        .next()
        .unwrap_or("")
        .to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
