//! Error types for proposal-export
//!
//! This module provides error handling for both halves of the crate:
//! - Client-side failures of the export flow (validation, submission, polling, download)
//! - Job service failures (store, renderer, shutdown)
//! - HTTP status code mapping and structured error bodies for the REST API

use crate::types::JobId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for proposal-export operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for proposal-export
///
/// Every step of the export flow fails with its own variant so callers can
/// tell a rejected submission from a lost poll or a failed download.
#[derive(Debug, Error)]
pub enum Error {
    /// Export options failed client-side validation (never reaches the network)
    #[error("invalid export options: {0}")]
    Validation(#[from] ValidationError),

    /// The export request was rejected or could not be delivered
    #[error("export submission failed: {message}")]
    Submission {
        /// HTTP status returned by the server, if a response was received
        status: Option<u16>,
        /// Human-readable reason
        message: String,
    },

    /// A status poll failed to complete (network error, non-2xx, unparseable body)
    #[error("status poll for job {job_id} failed: {message}")]
    PollTransport {
        /// Job being polled
        job_id: JobId,
        /// Human-readable reason
        message: String,
    },

    /// The server reported the job as failed
    #[error("export job {job_id} failed: {message}")]
    JobFailed {
        /// Failed job
        job_id: JobId,
        /// Error message reported by the server, verbatim
        message: String,
    },

    /// Fetching the finished artifact failed
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "client.poll_interval")
        key: Option<String>,
    },

    /// Job store operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// Export job not found in the store
    #[error("export job {job_id} not found")]
    JobNotFound {
        /// The job ID that was not found
        job_id: JobId,
    },

    /// Operation not valid for the job's current status
    #[error("cannot {operation} job {job_id} in state {current_state}")]
    InvalidState {
        /// The job in the wrong state
        job_id: JobId,
        /// The operation that was attempted (e.g., "download")
        operation: String,
        /// The job's current status
        current_state: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External conversion tool failed (browser, office suite)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Render method not available on this host
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new export jobs")]
    ShuttingDown,

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Client-side validation failure naming the offending field
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field (e.g., "margins.top")
    pub field: String,
    /// Why the value was rejected
    pub message: String,
}

impl ValidationError {
    /// Create a new validation error
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Last path segment of the field (`"top"` for `"margins.top"`)
    pub fn side(&self) -> &str {
        self.field.rsplit('.').next().unwrap_or(&self.field)
    }
}

/// Errors fetching the finished artifact
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Download attempted before the job completed (no request was made)
    #[error("export is not ready for download (state: {state})")]
    NotReady {
        /// Local state at the time of the call
        state: String,
    },

    /// Request could not be delivered or the body could not be read
    #[error("download of job {job_id} failed: {message}")]
    Transport {
        /// Job whose artifact was requested
        job_id: JobId,
        /// Human-readable reason
        message: String,
    },

    /// Server answered with a non-2xx status
    #[error("download of job {job_id} returned HTTP {status}")]
    Status {
        /// Job whose artifact was requested
        job_id: JobId,
        /// HTTP status code
        status: u16,
    },
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Stored row could not be decoded into a job
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// API error response format
///
/// Non-2xx responses from the export endpoints carry this body. `error` is
/// the human-readable message clients display; `code` is machine-readable.
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": "export job 1b4e28ba-2fa1-11d2-883f-0016d3cca427 not found",
///   "code": "job_not_found",
///   "details": { "job_id": "1b4e28ba-2fa1-11d2-883f-0016d3cca427" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Human-readable error message
    pub error: String,

    /// Machine-readable error code (e.g., "job_not_found", "validation_error")
    #[serde(default)]
    pub code: String,

    /// Optional additional context about the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            details: None,
        }
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "unauthorized" error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - Client error (invalid input)
            Error::Validation(_) => 400,
            Error::Config { .. } => 400,

            // 404 Not Found
            Error::JobNotFound { .. } => 404,

            // 409 Conflict - job not in a state that allows the operation
            Error::InvalidState { .. } => 409,
            Error::Download(DownloadError::NotReady { .. }) => 409,

            // 422 Unprocessable Entity - the job itself failed
            Error::JobFailed { .. } => 422,

            // 500 Internal Server Error - Server-side issues
            Error::Database(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway - Upstream/external failures
            Error::Submission { .. } => 502,
            Error::PollTransport { .. } => 502,
            Error::Download(_) => 502,
            Error::ExternalTool(_) => 502,

            // 501 Not Implemented - render method unavailable
            Error::NotSupported(_) => 501,

            // 503 Service Unavailable
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::Submission { .. } => "submission_failed",
            Error::PollTransport { .. } => "poll_failed",
            Error::JobFailed { .. } => "job_failed",
            Error::Download(e) => match e {
                DownloadError::NotReady { .. } => "not_ready",
                DownloadError::Transport { .. } => "download_failed",
                DownloadError::Status { .. } => "download_failed",
            },
            Error::Config { .. } => "config_error",
            Error::Database(_) => "database_error",
            Error::JobNotFound { .. } => "job_not_found",
            Error::InvalidState { .. } => "invalid_state",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::ExternalTool(_) => "external_tool_error",
            Error::NotSupported(_) => "not_supported",
            Error::ShuttingDown => "shutting_down",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Validation(v) => Some(serde_json::json!({
                "field": v.field,
            })),
            Error::JobNotFound { job_id } => Some(serde_json::json!({
                "job_id": job_id,
            })),
            Error::InvalidState {
                job_id,
                operation,
                current_state,
            } => Some(serde_json::json!({
                "job_id": job_id,
                "operation": operation,
                "current_state": current_state,
            })),
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({
                "key": key,
            })),
            _ => None,
        };

        ApiError {
            error: message,
            code,
            details,
        }
    }
}
