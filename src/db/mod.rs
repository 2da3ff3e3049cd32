//! Database layer for proposal-export
//!
//! Handles SQLite persistence for export jobs.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by concern:
//! - [`migrations`]: database lifecycle, schema migrations
//! - [`jobs`]: export job CRUD and the conditional lifecycle updates
//!
//! Every lifecycle update is a single statement guarded by the job's current
//! status, so a terminal job is never rewritten and progress never decreases.

use crate::error::{DatabaseError, Error};
use crate::options::{ExportOptions, RenderMethod};
use crate::types::{ExportJob, JobId, ProposalId, Status};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod jobs;
mod migrations;

/// New export job to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Job identifier
    pub job_id: JobId,
    /// Proposal to render
    pub proposal_id: ProposalId,
    /// Options the job was submitted with
    pub options: ExportOptions,
    /// Advisory estimate in seconds
    pub estimated_time_secs: u64,
}

/// Export job record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    /// Job ID as text
    pub job_id: String,
    /// Proposal identifier
    pub proposal_id: String,
    /// Current status (0=queued, 1=processing, 2=completed, 3=failed)
    pub status: i32,
    /// Percentage complete (0-100)
    pub progress: i64,
    /// Method the client asked for ("auto", "browser", "office")
    pub requested_method: String,
    /// Concrete method once resolved
    pub method: Option<String>,
    /// Submitted options as JSON
    pub options: String,
    /// Artifact name relative to the output directory
    pub file_path: Option<String>,
    /// Artifact size in bytes
    pub file_size: Option<i64>,
    /// Error message if the job failed
    pub error_message: Option<String>,
    /// Advisory estimate in seconds
    pub estimated_time: i64,
    /// Unix timestamp when the job was submitted
    pub created_at: i64,
    /// Unix timestamp when processing started
    pub started_at: Option<i64>,
    /// Unix timestamp when the job reached a terminal state
    pub completed_at: Option<i64>,
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

impl TryFrom<JobRow> for ExportJob {
    type Error = Error;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let job_id: JobId = row.job_id.parse().map_err(|e| {
            Error::Database(DatabaseError::CorruptRow(format!(
                "invalid job id '{}': {}",
                row.job_id, e
            )))
        })?;
        let proposal_id = ProposalId::new(row.proposal_id).map_err(|e| {
            Error::Database(DatabaseError::CorruptRow(format!(
                "job {}: invalid proposal id: {}",
                job_id, e
            )))
        })?;
        let options: ExportOptions = serde_json::from_str(&row.options).map_err(|e| {
            Error::Database(DatabaseError::CorruptRow(format!(
                "job {}: invalid options: {}",
                job_id, e
            )))
        })?;

        Ok(ExportJob {
            job_id,
            proposal_id,
            status: Status::from_i32(row.status),
            progress: row.progress.clamp(0, 100) as u8,
            options,
            method: row.method.as_deref().and_then(RenderMethod::parse),
            file_path: row.file_path,
            file_size: row.file_size.map(|size| size.max(0) as u64),
            error: row.error_message,
            estimated_time_secs: row.estimated_time.max(0) as u64,
            created_at: timestamp(row.created_at),
            started_at: row.started_at.map(timestamp),
            completed_at: row.completed_at.map(timestamp),
        })
    }
}

/// Database handle for proposal-export
pub struct Database {
    pool: SqlitePool,
}
