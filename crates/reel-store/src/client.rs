//! Firestore REST API client.
//!
//! Thin transport over the documents API: single-document reads and creates,
//! read-write transactions, atomic commits, and structured queries. Every request
//! is traced and recorded in metrics. An expired access token is refreshed
//! once and the request replayed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{info_span, Instrument};

use crate::error::{StoreError, StoreResult};
use crate::metrics::record_request;
use crate::retry::RetryConfig;
use crate::token_cache::TokenCache;
use crate::types::{
    BeginTransactionResponse, CommitRequest, CommitResponse, Document, RunQueryRequest,
    RunQueryResponse, StructuredQuery, Write,
};

/// Firestore client configuration.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    /// Database ID (usually "(default)")
    pub database_id: String,
    /// `host:port` of a local emulator. Disables authentication.
    pub emulator_host: Option<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
}

impl FirestoreConfig {
    pub fn from_env() -> StoreResult<Self> {
        let project_id = std::env::var("GCP_PROJECT_ID")
            .or_else(|_| std::env::var("FIREBASE_PROJECT_ID"))
            .map_err(|_| {
                StoreError::auth_error("GCP_PROJECT_ID or FIREBASE_PROJECT_ID must be set to access Firestore")
            })?;
        if project_id.is_empty() {
            return Err(StoreError::auth_error("GCP_PROJECT_ID cannot be empty"));
        }

        Ok(Self {
            project_id,
            database_id: std::env::var("FIRESTORE_DATABASE_ID")
                .unwrap_or_else(|_| "(default)".to_string()),
            emulator_host: std::env::var("FIRESTORE_EMULATOR_HOST")
                .ok()
                .filter(|h| !h.is_empty()),
            timeout: Duration::from_secs(
                std::env::var("FIRESTORE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            connect_timeout: Duration::from_secs(
                std::env::var("FIRESTORE_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            retry: RetryConfig::from_env(),
        })
    }

    /// Config pointing at an emulator (or a mock server in tests).
    pub fn emulator(project_id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database_id: "(default)".to_string(),
            emulator_host: Some(host.into()),
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(2),
            retry: RetryConfig::default(),
        }
    }
}

enum Auth {
    Token(Arc<TokenCache>),
    Emulator,
}

/// Firestore REST API client.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    config: FirestoreConfig,
    base_url: String,
    auth: Arc<Auth>,
}

impl FirestoreClient {
    pub async fn new(config: FirestoreConfig) -> StoreResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("reel-store/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(StoreError::Network)?;

        let (base_url, auth) = match &config.emulator_host {
            Some(host) => {
                let host = if host.starts_with("http") {
                    host.clone()
                } else {
                    format!("http://{}", host)
                };
                (
                    format!(
                        "{}/v1/projects/{}/databases/{}/documents",
                        host, config.project_id, config.database_id
                    ),
                    Auth::Emulator,
                )
            }
            None => (
                format!(
                    "https://firestore.googleapis.com/v1/projects/{}/databases/{}/documents",
                    config.project_id, config.database_id
                ),
                Auth::Token(Arc::new(TokenCache::new(Self::create_auth_provider().await?))),
            ),
        };

        Ok(Self {
            http,
            config,
            base_url,
            auth: Arc::new(auth),
        })
    }

    pub async fn from_env() -> StoreResult<Self> {
        Self::new(FirestoreConfig::from_env()?).await
    }

    async fn create_auth_provider() -> StoreResult<Arc<dyn TokenProvider>> {
        match CustomServiceAccount::from_env() {
            Ok(Some(sa)) => Ok(Arc::new(sa)),
            Ok(None) => gcp_auth::provider()
                .await
                .map_err(|e| StoreError::auth_error(format!("No GCP credentials available: {}", e))),
            Err(e) => Err(StoreError::auth_error(format!(
                "Failed to load service account: {}",
                e
            ))),
        }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.config.retry
    }

    /// Full resource name used in commits.
    pub fn document_name(&self, collection: &str, doc_id: &str) -> String {
        format!(
            "projects/{}/databases/{}/documents/{}/{}",
            self.config.project_id, self.config.database_id, collection, doc_id
        )
    }

    /// Get a document. `Ok(None)` when it does not exist.
    pub async fn get_document(&self, collection: &str, doc_id: &str) -> StoreResult<Option<Document>> {
        self.read_document(collection, doc_id, None).await
    }

    /// Get a document inside a read-write transaction, locking it until commit.
    pub async fn get_document_in(
        &self,
        collection: &str,
        doc_id: &str,
        transaction: &str,
    ) -> StoreResult<Option<Document>> {
        self.read_document(collection, doc_id, Some(transaction)).await
    }

    async fn read_document(
        &self,
        collection: &str,
        doc_id: &str,
        transaction: Option<&str>,
    ) -> StoreResult<Option<Document>> {
        let mut url = format!("{}/{}/{}", self.base_url, collection, doc_id);
        if let Some(tx) = transaction {
            url = format!("{}?transaction={}", url, urlencoding::encode(tx));
        }

        self.execute_request("get_document", collection, async {
            let response = self.send(|| self.http.get(&url)).await?;
            match response.status() {
                StatusCode::OK => Ok(Some(response.json().await?)),
                StatusCode::NOT_FOUND => Ok(None),
                status => Err(Self::error_from(status, &url, response).await),
            }
        })
        .await
    }

    /// Create a document; fails with `AlreadyExists` if the id is taken.
    pub async fn create_document(
        &self,
        collection: &str,
        doc_id: &str,
        doc: &Document,
    ) -> StoreResult<Document> {
        let url = format!(
            "{}/{}?documentId={}",
            self.base_url,
            collection,
            urlencoding::encode(doc_id)
        );

        self.execute_request("create_document", collection, async {
            let response = self.send(|| self.http.post(&url).json(doc)).await?;
            match response.status() {
                StatusCode::OK | StatusCode::CREATED => Ok(response.json().await?),
                StatusCode::CONFLICT => Err(StoreError::AlreadyExists(format!("{}/{}", collection, doc_id))),
                status => Err(Self::error_from(status, &url, response).await),
            }
        })
        .await
    }

    /// Start a read-write transaction.
    pub async fn begin_transaction(&self) -> StoreResult<String> {
        let url = format!("{}:beginTransaction", self.base_url);
        let body = serde_json::json!({ "options": { "readWrite": {} } });

        self.execute_request("begin_transaction", "batch", async {
            let response = self.send(|| self.http.post(&url).json(&body)).await?;
            match response.status() {
                StatusCode::OK => {
                    let started: BeginTransactionResponse = response.json().await?;
                    Ok(started.transaction)
                }
                status => Err(Self::error_from(status, &url, response).await),
            }
        })
        .await
    }

    /// Release a transaction without writing.
    pub async fn rollback(&self, transaction: &str) -> StoreResult<()> {
        let url = format!("{}:rollback", self.base_url);
        let body = serde_json::json!({ "transaction": transaction });

        self.execute_request("rollback", "batch", async {
            let response = self.send(|| self.http.post(&url).json(&body)).await?;
            match response.status() {
                StatusCode::OK => Ok(()),
                status => Err(Self::error_from(status, &url, response).await),
            }
        })
        .await
    }

    /// Apply writes atomically, optionally as the end of a transaction.
    /// Any failed precondition or aborted transaction rejects the whole commit.
    pub async fn commit(&self, writes: Vec<Write>, transaction: Option<String>) -> StoreResult<CommitResponse> {
        if writes.len() > 500 {
            return Err(StoreError::request_failed("Commit exceeds 500 write limit"));
        }

        let url = format!("{}:commit", self.base_url);
        let request = CommitRequest { writes, transaction };

        self.execute_request("commit", "batch", async {
            let response = self.send(|| self.http.post(&url).json(&request)).await?;
            match response.status() {
                StatusCode::OK => Ok(response.json().await?),
                status => Err(Self::error_from(status, &url, response).await),
            }
        })
        .await
    }

    /// Run a structured query over a top-level collection.
    pub async fn run_query(&self, query: StructuredQuery) -> StoreResult<Vec<Document>> {
        let url = format!("{}:runQuery", self.base_url);
        let collection = query
            .from
            .first()
            .map(|c| c.collection_id.clone())
            .unwrap_or_default();
        let request = RunQueryRequest {
            structured_query: query,
        };

        self.execute_request("run_query", &collection, async {
            let response = self.send(|| self.http.post(&url).json(&request)).await?;
            match response.status() {
                StatusCode::OK => {
                    let responses: Vec<RunQueryResponse> = response.json().await?;
                    Ok(responses.into_iter().filter_map(|r| r.document).collect())
                }
                status => Err(Self::error_from(status, &url, response).await),
            }
        })
        .await
    }

    /// Execute with transport retry.
    pub async fn with_retry<T, F, Fut>(&self, operation: &str, op: F) -> StoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = StoreResult<T>>,
    {
        crate::retry::with_retry(&self.config.retry, operation, op).await
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    /// Send a request with auth, refreshing an expired token once.
    async fn send<F>(&self, build: F) -> StoreResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let cache = match self.auth.as_ref() {
            Auth::Emulator => return Ok(build().bearer_auth("owner").send().await?),
            Auth::Token(cache) => cache,
        };

        let token = cache.get_token().await?;
        let response = build().bearer_auth(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if !(body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("\"UNAUTHENTICATED\"")) {
            return Err(StoreError::AuthError(body));
        }
        cache.invalidate().await;
        let token = cache.get_token().await?;
        Ok(build().bearer_auth(&token).send().await?)
    }

    async fn execute_request<T, F>(&self, operation: &str, collection: &str, fut: F) -> StoreResult<T>
    where
        F: std::future::Future<Output = StoreResult<T>>,
    {
        let span = info_span!("firestore_request", operation = %operation, collection = %collection);
        let start = Instant::now();
        let result = fut.instrument(span).await;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, start.elapsed().as_millis() as f64);

        result
    }

    async fn error_from(status: StatusCode, url: &str, response: Response) -> StoreError {
        let body = response.text().await.unwrap_or_default();
        StoreError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_from_env_validates_project_id() {
        std::env::remove_var("GCP_PROJECT_ID");
        std::env::remove_var("FIREBASE_PROJECT_ID");
        assert!(FirestoreConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_config_default_values() {
        std::env::set_var("GCP_PROJECT_ID", "test-project");
        std::env::remove_var("FIRESTORE_CONNECT_TIMEOUT_SECS");
        std::env::remove_var("FIRESTORE_EMULATOR_HOST");
        let config = FirestoreConfig::from_env().unwrap();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.database_id, "(default)");
        assert!(config.emulator_host.is_none());
        std::env::remove_var("GCP_PROJECT_ID");
    }
}
