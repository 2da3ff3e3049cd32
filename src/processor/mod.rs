//! Job processor: renders queued export jobs with bounded concurrency
//!
//! Job IDs flow through an unbounded channel to a dispatcher task. The
//! dispatcher acquires a permit from a semaphore sized by
//! `processor.max_concurrent_jobs` and spawns one render task per job. Every
//! state change goes through the store's guarded updates and is mirrored on
//! the service event channel.

mod renderer;

pub use renderer::{CliRenderer, RenderCapabilities, RenderRequest, Renderer, resolve_method};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{Event, JobId, Status};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Semaphore, broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Highest progress a renderer may report; 100 is reserved for completion
pub const MAX_REPORTED_PROGRESS: u8 = 99;

/// Failure message recorded for jobs cut short by shutdown
pub(crate) const INTERRUPTED_BY_SHUTDOWN: &str = "export interrupted by shutdown";

/// Progress sink handed to a [`Renderer`] for one job
///
/// Persists the value and emits [`Event::Progress`] when it advances.
/// Regressions and reports after the job left `processing` are ignored.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    db: Arc<Database>,
    event_tx: broadcast::Sender<Event>,
}

impl ProgressReporter {
    pub(crate) fn new(job_id: JobId, db: Arc<Database>, event_tx: broadcast::Sender<Event>) -> Self {
        Self {
            job_id,
            db,
            event_tx,
        }
    }

    /// Job this reporter belongs to
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Record progress (clamped to [`MAX_REPORTED_PROGRESS`])
    pub async fn report(&self, progress: u8) {
        let progress = progress.min(MAX_REPORTED_PROGRESS);
        match self.db.update_progress(&self.job_id, progress).await {
            Ok(true) => {
                tracing::debug!(job_id = %self.job_id, progress, "Export progress");
                self.event_tx
                    .send(Event::Progress {
                        job_id: self.job_id.clone(),
                        progress,
                    })
                    .ok();
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(job_id = %self.job_id, error = %e, "Failed to record export progress");
            }
        }
    }
}

/// Everything a render task needs
#[derive(Clone)]
pub(crate) struct ProcessorContext {
    pub(crate) db: Arc<Database>,
    pub(crate) renderer: Arc<dyn Renderer>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) output_dir: PathBuf,
    pub(crate) max_concurrent_jobs: usize,
    pub(crate) cancel: CancellationToken,
}

/// Handle used to feed jobs to the dispatcher
pub struct JobProcessor {
    queue_tx: mpsc::UnboundedSender<JobId>,
}

impl JobProcessor {
    /// Start the dispatcher task
    ///
    /// The returned handle completes after `ctx.cancel` fires and every
    /// in-flight render has settled.
    pub(crate) fn start(ctx: ProcessorContext) -> (Self, JoinHandle<()>) {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(dispatch(ctx, queue_rx));
        (Self { queue_tx }, handle)
    }

    /// Hand a queued job to the dispatcher
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once the dispatcher has stopped.
    pub fn enqueue(&self, job_id: JobId) -> Result<()> {
        self.queue_tx.send(job_id).map_err(|_| Error::ShuttingDown)
    }
}

async fn dispatch(ctx: ProcessorContext, mut queue_rx: mpsc::UnboundedReceiver<JobId>) {
    let limit = Arc::new(Semaphore::new(ctx.max_concurrent_jobs.max(1)));
    let mut tasks = JoinSet::new();

    tracing::info!(
        max_concurrent_jobs = ctx.max_concurrent_jobs,
        renderer = ctx.renderer.name(),
        "Job processor started"
    );

    loop {
        let job_id = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Render task panicked");
                }
                continue;
            }
            next = queue_rx.recv() => match next {
                Some(job_id) => job_id,
                None => break,
            },
        };

        // Blocks while max_concurrent_jobs renders are in flight
        let permit = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            permit = limit.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let task_ctx = ctx.clone();
        tasks.spawn(async move {
            let _permit = permit;
            run_job(&task_ctx, &job_id).await;
        });
    }

    let in_flight = tasks.len();
    if in_flight > 0 {
        tracing::info!(in_flight, "Waiting for in-flight renders to stop");
    }
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Render task panicked");
        }
    }
    tracing::info!("Job processor stopped");
}

async fn run_job(ctx: &ProcessorContext, job_id: &JobId) {
    if let Err(e) = process_job(ctx, job_id).await {
        tracing::error!(job_id = %job_id, error = %e, "Export job processing error");
    }
}

async fn process_job(ctx: &ProcessorContext, job_id: &JobId) -> Result<()> {
    let Some(job) = ctx.db.get_job(job_id).await? else {
        tracing::debug!(job_id = %job_id, "Job vanished before processing");
        return Ok(());
    };
    if job.status != Status::Queued {
        tracing::debug!(job_id = %job_id, status = %job.status, "Skipping job that is no longer queued");
        return Ok(());
    }

    let method = match resolve_method(job.options.method, ctx.renderer.capabilities()) {
        Ok(method) => method,
        Err(e) => return fail(ctx, job_id, &e.to_string()).await,
    };

    if !ctx.db.mark_processing(job_id, method).await? {
        return Ok(());
    }
    ctx.event_tx
        .send(Event::Processing {
            job_id: job_id.clone(),
            method,
        })
        .ok();
    tracing::info!(
        job_id = %job_id,
        proposal_id = %job.proposal_id,
        method = %method,
        "Rendering export"
    );

    let file_name = format!("{}.pdf", job_id);
    let request = RenderRequest {
        job_id: job_id.clone(),
        proposal_id: job.proposal_id,
        method,
        options: job.options,
        output_path: ctx.output_dir.join(&file_name),
    };
    let reporter = ProgressReporter::new(job_id.clone(), ctx.db.clone(), ctx.event_tx.clone());
    let started = Instant::now();

    let rendered = tokio::select! {
        result = ctx.renderer.render(&request, &reporter) => result,
        _ = ctx.cancel.cancelled() => Err(Error::ShuttingDown),
    };
    let outcome = match rendered {
        Ok(()) => tokio::fs::metadata(&request.output_path)
            .await
            .map(|meta| meta.len())
            .map_err(|e| Error::ExternalTool(format!("{} renderer produced no output: {}", method, e))),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(file_size) => {
            if ctx.db.mark_completed(job_id, &file_name, file_size).await? {
                ctx.event_tx
                    .send(Event::Completed {
                        job_id: job_id.clone(),
                        file_size,
                    })
                    .ok();
                tracing::info!(
                    job_id = %job_id,
                    file_size,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Export completed"
                );
            }
            Ok(())
        }
        Err(e) => {
            remove_partial(&request.output_path).await;
            let message = match e {
                Error::ShuttingDown => INTERRUPTED_BY_SHUTDOWN.to_string(),
                other => other.to_string(),
            };
            fail(ctx, job_id, &message).await
        }
    }
}

async fn fail(ctx: &ProcessorContext, job_id: &JobId, message: &str) -> Result<()> {
    if ctx.db.mark_failed(job_id, message).await? {
        ctx.event_tx
            .send(Event::Failed {
                job_id: job_id.clone(),
                error: message.to_string(),
            })
            .ok();
        tracing::warn!(job_id = %job_id, error = %message, "Export failed");
    }
    Ok(())
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial export"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial export"),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
