//! Export client
//!
//! [`ExportClient`] speaks the three export endpoints (submit, status, download).
//! [`ExportController`] layers the job state machine and the polling loop on top.

mod controller;
mod poller;
mod state;


pub use controller::{ExportController, ExportEvent};
pub use poller::StatusPoller;
pub use state::{ExportState, FailureReason};

use crate::config::ClientConfig;
use crate::error::{ApiError, DownloadError, Error, Result};
use crate::options::ExportOptions;
use crate::retry::{IsRetryable, is_retryable_status};
use crate::types::{JobId, JobStatus, ProposalId, StatusResponse, SubmitResponse};
use bytes::Bytes;

const USER_AGENT: &str = concat!("proposal-export/", env!("CARGO_PKG_VERSION"));

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Failure of a single status poll
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// Request could not be delivered or the body could not be read
    #[error("{0}")]
    Transport(reqwest::Error),
    /// Server answered with a non-2xx status
    #[error("server returned HTTP {0}")]
    Status(u16),
    /// Body was not a valid status payload
    #[error("malformed status response: {0}")]
    Malformed(String),
}

impl IsRetryable for PollError {
    fn is_retryable(&self) -> bool {
        match self {
            PollError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            PollError::Status(status) => is_retryable_status(*status),
            PollError::Malformed(_) => false,
        }
    }
}

/// HTTP client for the export endpoints
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone, Debug)]
pub struct ExportClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ExportClient {
    /// Build a client from configuration
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the base URL is invalid, the request timeout
    /// is zero, or the HTTP client cannot be created.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        if config.request_timeout.is_zero() {
            return Err(Error::Config {
                message: "request timeout must be greater than zero".to_string(),
                key: Some("client.request_timeout".to_string()),
            });
        }
        let parsed = url::Url::parse(&config.base_url).map_err(|e| Error::Config {
            message: format!("invalid base URL '{}': {}", config.base_url, e),
            key: Some("client.base_url".to_string()),
        })?;
        if parsed.cannot_be_a_base() {
            return Err(Error::Config {
                message: format!("'{}' cannot be used as a base URL", config.base_url),
                key: Some("client.base_url".to_string()),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to create HTTP client: {}", e),
                key: None,
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Base URL requests are sent to (no trailing slash)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn export_url(&self, proposal_id: &ProposalId, suffix: &str) -> String {
        format!(
            "{}/api/proposals/{}/export{}",
            self.base_url,
            urlencoding::encode(proposal_id.as_str()),
            suffix
        )
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let request = self.http.request(method, url);
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    /// Submit an export job
    ///
    /// Options are validated before anything is sent.
    ///
    /// # Errors
    /// - [`Error::Validation`] if the options are invalid (no request is made)
    /// - [`Error::Submission`] if the request fails, the server answers non-2xx,
    ///   or the response body is not a valid submission response
    pub async fn submit(
        &self,
        proposal_id: &ProposalId,
        options: &ExportOptions,
    ) -> Result<SubmitResponse> {
        options.validate()?;

        let url = self.export_url(proposal_id, "");
        tracing::debug!(proposal_id = %proposal_id, url = %url, "Submitting export job");

        let response = self
            .request(reqwest::Method::POST, url)
            .json(options)
            .send()
            .await
            .map_err(|e| Error::Submission {
                status: None,
                message: describe_transport_error(&e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|api_error| api_error.error)
                .unwrap_or_else(|_| format!("server returned HTTP {}", status.as_u16()));
            return Err(Error::Submission {
                status: Some(status.as_u16()),
                message,
            });
        }

        let body = response.bytes().await.map_err(|e| Error::Submission {
            status: Some(status.as_u16()),
            message: format!("failed to read response body: {}", e),
        })?;
        serde_json::from_slice::<SubmitResponse>(&body).map_err(|e| Error::Submission {
            status: Some(status.as_u16()),
            message: format!("malformed submission response: {}", e),
        })
    }

    /// Fetch the current status of a job
    pub async fn fetch_status(
        &self,
        proposal_id: &ProposalId,
        job_id: &JobId,
    ) -> std::result::Result<JobStatus, PollError> {
        let url = self.export_url(proposal_id, "/status");
        let response = self
            .request(reqwest::Method::GET, url)
            .query(&[("jobId", job_id.as_str())])
            .send()
            .await
            .map_err(PollError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(PollError::Transport)?;
        let wire: StatusResponse =
            serde_json::from_slice(&body).map_err(|e| PollError::Malformed(e.to_string()))?;
        JobStatus::try_from(wire).map_err(PollError::Malformed)
    }

    /// Download the artifact of a completed job
    ///
    /// This does not check the job's state; use
    /// [`ExportController::download`] for the guarded variant.
    pub async fn download(&self, proposal_id: &ProposalId, job_id: &JobId) -> Result<Bytes> {
        let url = self.export_url(proposal_id, "/download");
        let response = self
            .request(reqwest::Method::GET, url)
            .query(&[("jobId", job_id.as_str())])
            .send()
            .await
            .map_err(|e| DownloadError::Transport {
                job_id: job_id.clone(),
                message: describe_transport_error(&e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                job_id: job_id.clone(),
                status: status.as_u16(),
            }
            .into());
        }

        let bytes = response.bytes().await.map_err(|e| DownloadError::Transport {
            job_id: job_id.clone(),
            message: format!("failed to read artifact: {}", e),
        })?;
        tracing::debug!(job_id = %job_id, bytes = bytes.len(), "Downloaded export artifact");
        Ok(bytes)
    }
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {}", e)
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    }
}
