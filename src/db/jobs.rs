//! Export job CRUD and lifecycle updates.

use crate::error::DatabaseError;
use crate::options::RenderMethod;
use crate::types::{ExportJob, JobId, Status};
use crate::{Error, Result};
use chrono::{DateTime, Utc};

use super::{Database, JobRow, NewJob};

const JOB_COLUMNS: &str = r#"
    job_id, proposal_id, status, progress, requested_method, method,
    options, file_path, file_size, error_message, estimated_time,
    created_at, started_at, completed_at
"#;

impl Database {
    /// Insert a new job in the `queued` state
    pub async fn insert_job(&self, job: &NewJob) -> Result<()> {
        let now = Utc::now().timestamp();
        let options = serde_json::to_string(&job.options)?;

        sqlx::query(
            r#"
            INSERT INTO export_jobs (
                job_id, proposal_id, status, progress, requested_method,
                options, estimated_time, created_at
            ) VALUES (?, ?, ?, 0, ?, ?, ?, ?)
            "#,
        )
        .bind(job.job_id.as_str())
        .bind(job.proposal_id.as_str())
        .bind(Status::Queued.to_i32())
        .bind(job.options.method.as_str())
        .bind(options)
        .bind(job.estimated_time_secs as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert export job: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get a job by ID
    pub async fn get_job(&self, job_id: &JobId) -> Result<Option<ExportJob>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM export_jobs WHERE job_id = ?"
        ))
        .bind(job_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get export job: {}",
                e
            )))
        })?;

        row.map(ExportJob::try_from).transpose()
    }

    /// List jobs with a specific status, oldest first
    pub async fn list_jobs_by_status(&self, status: Status) -> Result<Vec<ExportJob>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM export_jobs WHERE status = ? ORDER BY created_at ASC"
        ))
        .bind(status.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list export jobs: {}",
                e
            )))
        })?;

        rows.into_iter().map(ExportJob::try_from).collect()
    }

    /// Move a queued job to `processing` with its resolved method
    ///
    /// Returns false if the job was not queued.
    pub async fn mark_processing(&self, job_id: &JobId, method: RenderMethod) -> Result<bool> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET status = ?, method = ?, started_at = ?
            WHERE job_id = ? AND status = ?
            "#,
        )
        .bind(Status::Processing.to_i32())
        .bind(method.as_str())
        .bind(now)
        .bind(job_id.as_str())
        .bind(Status::Queued.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark job processing: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Raise the progress of a processing job
    ///
    /// Values at or below the stored progress are ignored. Returns whether the
    /// stored value changed.
    pub async fn update_progress(&self, job_id: &JobId, progress: u8) -> Result<bool> {
        let progress = i64::from(progress.min(100));
        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET progress = ?
            WHERE job_id = ? AND status = ? AND progress < ?
            "#,
        )
        .bind(progress)
        .bind(job_id.as_str())
        .bind(Status::Processing.to_i32())
        .bind(progress)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update job progress: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Complete a processing job
    ///
    /// Forces progress to 100. Returns false if the job was not processing.
    pub async fn mark_completed(
        &self,
        job_id: &JobId,
        file_path: &str,
        file_size: u64,
    ) -> Result<bool> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET status = ?, progress = 100, file_path = ?, file_size = ?, completed_at = ?
            WHERE job_id = ? AND status = ?
            "#,
        )
        .bind(Status::Completed.to_i32())
        .bind(file_path)
        .bind(file_size as i64)
        .bind(now)
        .bind(job_id.as_str())
        .bind(Status::Processing.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark job completed: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Fail a queued or processing job
    ///
    /// Returns false if the job was already terminal.
    pub async fn mark_failed(&self, job_id: &JobId, error: &str) -> Result<bool> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET status = ?, error_message = ?, completed_at = ?
            WHERE job_id = ? AND status IN (?, ?)
            "#,
        )
        .bind(Status::Failed.to_i32())
        .bind(error)
        .bind(now)
        .bind(job_id.as_str())
        .bind(Status::Queued.to_i32())
        .bind(Status::Processing.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark job failed: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete terminal jobs that finished before `cutoff`
    ///
    /// Returns the deleted jobs so their artifacts can be removed.
    pub async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<ExportJob>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            DELETE FROM export_jobs
            WHERE status IN (?, ?) AND completed_at IS NOT NULL AND completed_at < ?
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(Status::Completed.to_i32())
        .bind(Status::Failed.to_i32())
        .bind(cutoff.timestamp())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to purge export jobs: {}",
                e
            )))
        })?;

        let mut purged = Vec::with_capacity(rows.len());
        for row in rows {
            match ExportJob::try_from(row) {
                Ok(job) => purged.push(job),
                Err(e) => tracing::warn!(error = %e, "Purged a corrupt export job row"),
            }
        }
        Ok(purged)
    }

    /// Fail every job left in `processing` by an unclean stop
    ///
    /// Returns the number of jobs failed.
    pub async fn fail_interrupted(&self, error: &str) -> Result<u64> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET status = ?, error_message = ?, completed_at = ?
            WHERE status = ?
            "#,
        )
        .bind(Status::Failed.to_i32())
        .bind(error)
        .bind(now)
        .bind(Status::Processing.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to fail interrupted jobs: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }
}
