//! Core types for proposal-export
//!
//! Identifiers, the job record, the tagged job status and the wire payloads
//! shared by the client and the job service.

use crate::options::{ExportMethod, ExportOptions, RenderMethod};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Identifier of the proposal being exported
///
/// Opaque to this crate; it only has to be non-empty and fit in one URL path segment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct ProposalId(String);

impl ProposalId {
    /// Create a proposal ID, rejecting empty values and path separators
    pub fn new(id: impl Into<String>) -> Result<Self, crate::error::ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(crate::error::ValidationError::new(
                "proposalId",
                "must not be empty",
            ));
        }
        if id.contains('/') {
            return Err(crate::error::ValidationError::new(
                "proposalId",
                "must not contain '/'",
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProposalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ProposalId {
    type Err = crate::error::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Identifier of an export job
///
/// Opaque to clients: any non-empty string the server hands out is accepted
/// and echoed back verbatim. The job service mints UUID v4 strings.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String", into = "String")]
#[schema(value_type = String)]
pub struct JobId(String);

impl JobId {
    /// Mint a fresh job ID (UUID v4, never reused)
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for JobId {
    type Error = crate::error::ValidationError;

    fn try_from(id: String) -> Result<Self, Self::Error> {
        if id.trim().is_empty() {
            return Err(crate::error::ValidationError::new(
                "jobId",
                "must not be empty",
            ));
        }
        Ok(Self(id))
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl std::str::FromStr for JobId {
    type Err = crate::error::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_string())
    }
}

/// Lifecycle status of an export job (untagged form, as stored)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Accepted, waiting for a worker
    Queued,
    /// Being rendered
    Processing,
    /// Artifact ready for download
    Completed,
    /// Rendering failed
    Failed,
}

impl Status {
    /// Convert integer status code to Status enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => Status::Queued,
            1 => Status::Processing,
            2 => Status::Completed,
            3 => Status::Failed,
            _ => Status::Failed, // Default to Failed for unknown status
        }
    }

    /// Convert Status enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            Status::Queued => 0,
            Status::Processing => 1,
            Status::Completed => 2,
            Status::Failed => 3,
        }
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::Processing => "processing",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }

    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job status with only the fields that are meaningful for each state
#[derive(Clone, Debug, PartialEq)]
pub enum JobStatus {
    /// Waiting for a worker
    Queued {
        /// Concrete method, if already resolved
        method: Option<RenderMethod>,
    },
    /// Being rendered
    Processing {
        /// Percentage complete (0-100)
        progress: u8,
        /// Concrete method in use
        method: Option<RenderMethod>,
    },
    /// Artifact ready
    Completed {
        /// Artifact size in bytes
        file_size: u64,
        /// Artifact name on the server
        file_path: Option<String>,
        /// Method that produced it
        method: Option<RenderMethod>,
    },
    /// Rendering failed
    Failed {
        /// Error reported by the job processor
        error: String,
    },
}

impl JobStatus {
    /// The untagged status
    pub fn status(&self) -> Status {
        match self {
            JobStatus::Queued { .. } => Status::Queued,
            JobStatus::Processing { .. } => Status::Processing,
            JobStatus::Completed { .. } => Status::Completed,
            JobStatus::Failed { .. } => Status::Failed,
        }
    }

    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

/// Status payload exactly as it travels over HTTP
///
/// Every field but `status` is optional on the wire; convert to [`JobStatus`]
/// at the boundary instead of passing this around.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// One of "queued", "processing", "completed", "failed"
    pub status: String,
    /// Percentage complete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u32>,
    /// Artifact name (completed only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Artifact size in bytes (completed only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Concrete render method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Error message (failed only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TryFrom<StatusResponse> for JobStatus {
    type Error = String;

    fn try_from(wire: StatusResponse) -> Result<Self, Self::Error> {
        let method = wire.method.as_deref().and_then(advisory_method);
        let progress = match wire.progress {
            Some(p) if p > 100 => return Err(format!("progress {p} is out of range")),
            Some(p) => p as u8,
            None => 0,
        };

        match wire.status.as_str() {
            "queued" => Ok(JobStatus::Queued { method }),
            "processing" => Ok(JobStatus::Processing { progress, method }),
            "completed" => {
                let file_size = wire
                    .file_size
                    .ok_or_else(|| "completed status without fileSize".to_string())?;
                Ok(JobStatus::Completed {
                    file_size,
                    file_path: wire.file_path,
                    method,
                })
            }
            "failed" => Ok(JobStatus::Failed {
                error: wire
                    .error
                    .unwrap_or_else(|| "export failed without an error message".to_string()),
            }),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

/// Parse an advisory method name; unknown names are logged and dropped
fn advisory_method(name: &str) -> Option<RenderMethod> {
    if name == "auto" {
        return None;
    }
    let method = RenderMethod::parse(name);
    if method.is_none() {
        tracing::warn!(method = name, "Ignoring unknown render method reported by server");
    }
    method
}

/// Deserialize a submission method, mapping unknown names to `Auto`
fn lenient_export_method<'de, D>(deserializer: D) -> Result<ExportMethod, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    Ok(name.parse().unwrap_or_else(|_| {
        tracing::warn!(method = %name, "Ignoring unknown export method reported by server");
        ExportMethod::Auto
    }))
}

/// Deserialize a non-negative number of seconds, rounding fractions up
fn ceil_seconds<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(serde::de::Error::custom(format!(
            "estimatedTime must be a non-negative number, got {secs}"
        )));
    }
    Ok(secs.ceil() as u64)
}

impl From<JobStatus> for StatusResponse {
    fn from(status: JobStatus) -> Self {
        let name = status.status().as_str().to_string();
        match status {
            JobStatus::Queued { method } => StatusResponse {
                status: name,
                progress: Some(0),
                method: method.map(|m| m.as_str().to_string()),
                ..Default::default()
            },
            JobStatus::Processing { progress, method } => StatusResponse {
                status: name,
                progress: Some(progress as u32),
                method: method.map(|m| m.as_str().to_string()),
                ..Default::default()
            },
            JobStatus::Completed {
                file_size,
                file_path,
                method,
            } => StatusResponse {
                status: name,
                progress: Some(100),
                file_path,
                file_size: Some(file_size),
                method: method.map(|m| m.as_str().to_string()),
                error: None,
            },
            JobStatus::Failed { error } => StatusResponse {
                status: name,
                error: Some(error),
                ..Default::default()
            },
        }
    }
}

/// Response to a successful export submission
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    /// Identifier to poll with
    pub job_id: JobId,
    /// Method chosen by the server (may still be "auto" until a worker resolves it)
    ///
    /// Advisory: a name this crate does not know reads as `auto`.
    #[serde(default, deserialize_with = "lenient_export_method")]
    pub method: ExportMethod,
    /// Advisory duration in seconds (fractional values round up)
    #[serde(default, deserialize_with = "ceil_seconds")]
    #[schema(value_type = f64)]
    pub estimated_time: u64,
}

/// Export job record owned by the job service
#[derive(Clone, Debug, PartialEq)]
pub struct ExportJob {
    /// Job identifier
    pub job_id: JobId,
    /// Proposal the job renders
    pub proposal_id: ProposalId,
    /// Current status
    pub status: Status,
    /// Percentage complete (0-100, never decreases)
    pub progress: u8,
    /// Options the job was submitted with
    pub options: ExportOptions,
    /// Concrete method, resolved before processing starts
    pub method: Option<RenderMethod>,
    /// Artifact name relative to the output directory (completed only)
    pub file_path: Option<String>,
    /// Artifact size in bytes (completed only)
    pub file_size: Option<u64>,
    /// Error message (failed only)
    pub error: Option<String>,
    /// Advisory estimate in seconds
    pub estimated_time_secs: u64,
    /// When the job was submitted
    pub created_at: DateTime<Utc>,
    /// When processing started
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExportJob {
    /// Project the record into the tagged status
    pub fn job_status(&self) -> JobStatus {
        match self.status {
            Status::Queued => JobStatus::Queued {
                method: self.method,
            },
            Status::Processing => JobStatus::Processing {
                progress: self.progress,
                method: self.method,
            },
            Status::Completed => JobStatus::Completed {
                file_size: self.file_size.unwrap_or(0),
                file_path: self.file_path.clone(),
                method: self.method,
            },
            Status::Failed => JobStatus::Failed {
                error: self
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            },
        }
    }
}

/// Render methods this service can execute
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Capabilities {
    /// Name of the renderer implementation
    pub renderer: String,
    /// Concrete methods available on this host
    pub methods: Vec<RenderMethod>,
}

/// Event emitted by the job service during a job's lifecycle
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Job accepted and queued
    Queued {
        /// Job ID
        job_id: JobId,
        /// Proposal being exported
        proposal_id: ProposalId,
    },

    /// A worker picked the job up
    Processing {
        /// Job ID
        job_id: JobId,
        /// Resolved method
        method: RenderMethod,
    },

    /// Rendering progress
    Progress {
        /// Job ID
        job_id: JobId,
        /// Percentage complete
        progress: u8,
    },

    /// Artifact ready
    Completed {
        /// Job ID
        job_id: JobId,
        /// Artifact size in bytes
        file_size: u64,
    },

    /// Rendering failed
    Failed {
        /// Job ID
        job_id: JobId,
        /// Error message
        error: String,
    },

    /// Terminal job removed by the retention sweep
    Purged {
        /// Job ID
        job_id: JobId,
    },

    /// Service is shutting down
    Shutdown,
}

impl Event {
    /// Job the event refers to, if any
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Event::Queued { job_id, .. }
            | Event::Processing { job_id, .. }
            | Event::Progress { job_id, .. }
            | Event::Completed { job_id, .. }
            | Event::Failed { job_id, .. }
            | Event::Purged { job_id } => Some(job_id),
            Event::Shutdown => None,
        }
    }

    /// Whether the event ends the job's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::Completed { .. } | Event::Failed { .. } | Event::Purged { .. } | Event::Shutdown
        )
    }

    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            Event::Queued { .. } => "queued",
            Event::Processing { .. } => "processing",
            Event::Progress { .. } => "progress",
            Event::Completed { .. } => "completed",
            Event::Failed { .. } => "failed",
            Event::Purged { .. } => "purged",
            Event::Shutdown => "shutdown",
        }
    }
}
