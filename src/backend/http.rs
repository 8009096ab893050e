//! HTTP query service client.
//!
//! Implements the `QueryBackend` trait over the service's JSON API:
//!
//! - `POST   {base}/queries` submits SQL
//! - `GET    {base}/queries/{id}` returns the status
//! - `GET    {base}/queries/{id}/results?cursor=..&pageSize=..` returns a page
//! - `DELETE {base}/queries/{id}` cancels

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{
    QueryBackend, QueryId, ResultPage, ResultsRequest, StatusResponse, SubmitRequest,
    SubmitResponse,
};
use crate::error::{Result, ShellError};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP backend configuration.
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Service base URL, e.g. `https://api.example.com/v1/`.
    pub base_url: String,
    /// Bearer token sent with every request.
    pub api_token: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Whether the service exposes `DELETE /queries/{id}`.
    pub cancel_endpoint: bool,
}

impl HttpBackendConfig {
    /// Creates a config for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            cancel_endpoint: false,
        }
    }

    /// Sets the bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Declares that the service supports remote cancellation.
    pub fn with_cancel_endpoint(mut self) -> Self {
        self.cancel_endpoint = true;
        self
    }
}

/// Query service client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    config: HttpBackendConfig,
    base: Url,
    client: Client,
}

impl HttpBackend {
    /// Creates a new client with the given configuration.
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        let mut base = Url::parse(&config.base_url)
            .map_err(|e| ShellError::config(format!("Invalid base URL: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ShellError::config(format!(
                "Base URL cannot be used for requests: {}",
                config.base_url
            )));
        }
        // Url::join drops the last segment unless the path ends with a slash.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ShellError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            base,
            client,
        })
    }

    /// Builds the URL of a query resource, optionally with a sub-resource.
    fn query_url(&self, query_id: Option<&QueryId>, suffix: Option<&str>) -> Result<Url> {
        let mut url = self
            .base
            .join("queries")
            .map_err(|e| ShellError::internal(format!("Failed to build URL: {e}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ShellError::internal("Base URL cannot have path segments"))?;
            if let Some(id) = query_id {
                segments.push(id.as_str());
            }
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Sends a request and returns the body of a successful response.
    async fn execute(&self, request: RequestBuilder) -> Result<String> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(Self::map_request_error)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ShellError::transport(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(Self::parse_error(status, &body));
        }
        Ok(body)
    }

    /// Sends a request and decodes its JSON body.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let body = self.execute(request).await?;
        serde_json::from_str(&body)
            .map_err(|e| ShellError::internal(format!("Failed to parse response: {}", e)))
    }

    /// Maps a request that never produced a response.
    fn map_request_error(error: reqwest::Error) -> ShellError {
        if error.is_timeout() {
            ShellError::transport("Request timed out")
        } else if error.is_connect() {
            ShellError::transport("Failed to connect to the query service. Check your network.")
        } else {
            ShellError::transport(format!("Request failed: {}", error))
        }
    }

    /// Turns a non-success response into an error with a human-readable message.
    fn parse_error(status: StatusCode, body: &str) -> ShellError {
        let message = extract_message(body)
            .unwrap_or_else(|| format!("HTTP {}: {}", status.as_u16(), body.trim()));

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return ShellError::transport(message);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return ShellError::rejected(format!("Not authorized: {message}"));
        }
        ShellError::rejected(message)
    }
}

/// Error body shapes the service is known to return.
#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Flat { message: String },
    Nested { error: NestedError },
}

#[derive(Deserialize)]
struct NestedError {
    message: String,
}

fn extract_message(body: &str) -> Option<String> {
    match serde_json::from_str::<ErrorBody>(body).ok()? {
        ErrorBody::Flat { message } => Some(message),
        ErrorBody::Nested { error } => Some(error.message),
    }
}

#[async_trait]
impl QueryBackend for HttpBackend {
    async fn submit_query(&self, request: &SubmitRequest) -> Result<SubmitResponse> {
        let url = self.query_url(None, None)?;
        debug!("POST {}", url);
        self.send(self.client.post(url).json(request)).await
    }

    async fn query_status(&self, query_id: &QueryId) -> Result<StatusResponse> {
        let url = self.query_url(Some(query_id), None)?;
        debug!("GET {}", url);
        self.send(self.client.get(url)).await
    }

    async fn query_results(&self, request: &ResultsRequest) -> Result<ResultPage> {
        let mut url = self.query_url(Some(&request.query_id), Some("results"))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(cursor) = &request.cursor {
                query.append_pair("cursor", cursor);
            }
            if let Some(page_size) = request.page_size {
                query.append_pair("pageSize", &page_size.to_string());
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        debug!("GET {}", url);
        self.send(self.client.get(url)).await
    }

    async fn cancel_query(&self, query_id: &QueryId) -> Result<bool> {
        if !self.config.cancel_endpoint {
            return Ok(false);
        }
        let url = self.query_url(Some(query_id), None)?;
        debug!("DELETE {}", url);
        self.execute(self.client.delete(url)).await?;
        Ok(true)
    }

    fn supports_cancel(&self) -> bool {
        self.config.cancel_endpoint
    }
}
