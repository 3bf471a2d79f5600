//! REST client for the DevCraft HTTP endpoints.
//!
//! Wraps project analysis, generation submission, status queries and
//! artifact download using [`reqwest`]. Each call is a single
//! request/response; retry policy belongs to the caller.

use std::path::Path;

use async_trait::async_trait;
use devcraft_core::status::StatusSnapshot;
use devcraft_core::types::JobHandle;
use devcraft_core::wire::{
    AnalyzeRequest, Analysis, GenerateRequest, GenerateResponse, StatusResponse,
};

use crate::client::LogStreamClient;
use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::source::StatusSource;

/// HTTP client for one DevCraft API.
#[derive(Debug, Clone)]
pub struct TransportClient {
    client: reqwest::Client,
    api_url: String,
    ws_url: String,
}

impl TransportClient {
    /// Create a client with its own connection pool and the configured
    /// request timeout.
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            ws_url: config.ws_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Log stream client pointing at the same deployment.
    pub fn log_stream(&self) -> LogStreamClient {
        LogStreamClient::new(self.ws_url.clone())
    }

    /// Ask the API to classify a project description.
    ///
    /// Sends `POST /api/analyze`.
    pub async fn analyze(&self, description: &str) -> Result<Analysis, TransportError> {
        let body = AnalyzeRequest::new(description)?;

        let response = self
            .client
            .post(format!("{}/api/analyze", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Submit a generation job.
    ///
    /// Sends `POST /api/generate` and returns the handle of the new job.
    pub async fn generate(
        &self,
        project_name: &str,
        description: &str,
    ) -> Result<JobHandle, TransportError> {
        let body = GenerateRequest::new(project_name, description)?;

        let response = self
            .client
            .post(format!("{}/api/generate", self.api_url))
            .json(&body)
            .send()
            .await?;

        let generated: GenerateResponse = Self::parse_response(response).await?;
        let job = JobHandle::new(generated.job_id)
            .map_err(|e| TransportError::Protocol(format!("invalid job id: {e}")))?;

        tracing::info!(job_id = %job, project_name = %body.project_name, "Generation job submitted");
        Ok(job)
    }

    /// Query the status of a job.
    ///
    /// Sends `GET /api/status/{job_id}`. Unknown status values and
    /// responses for a different job are protocol errors.
    pub async fn status(&self, job: &JobHandle) -> Result<StatusSnapshot, TransportError> {
        let response = self
            .client
            .get(format!("{}/api/status/{}", self.api_url, job))
            .send()
            .await?;

        let status: StatusResponse = Self::parse_response(response).await?;
        StatusSnapshot::from_response(job, status)
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }

    /// Absolute URL for an artifact location reported by the API.
    ///
    /// Locations are usually server-relative (`/api/download/{job_id}`);
    /// absolute URLs are returned unchanged.
    pub fn artifact_url(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else if location.starts_with('/') {
            format!("{}{}", self.api_url, location)
        } else {
            format!("{}/{}", self.api_url, location)
        }
    }

    /// Download an artifact to `dest`, returning the number of bytes written.
    pub async fn download(&self, location: &str, dest: &Path) -> Result<u64, TransportError> {
        let url = self.artifact_url(location);
        let response = self.client.get(&url).send().await?;
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;

        tracing::info!(url = %url, dest = %dest.display(), bytes = bytes.len(), "Artifact downloaded");
        Ok(bytes.len() as u64)
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, or turn it into a
    /// [`TransportError::Api`] carrying the status and body text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    ///
    /// The body is read as text first so that a malformed payload is a
    /// [`TransportError::Protocol`] rather than a request failure.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, TransportError> {
        let response = Self::ensure_success(response).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl StatusSource for TransportClient {
    async fn fetch_status(&self, job: &JobHandle) -> Result<StatusSnapshot, TransportError> {
        self.status(job).await
    }
}
