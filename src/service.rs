//! Export job service: owns the job store, the processor and the retention sweep
//!
//! [`ExportService`] is the server half of the export flow. It accepts jobs,
//! answers status queries, hands out finished artifacts and broadcasts
//! lifecycle [`Event`]s to subscribers (the SSE endpoint among them).
//!
//! ```no_run
//! use proposal_export::{Config, ExportService};
//! use std::sync::Arc;
//!
//! # async fn example() -> proposal_export::Result<()> {
//! let service = Arc::new(ExportService::new(Config::default()).await?);
//! let api = service.spawn_api_server();
//!
//! proposal_export::run_with_shutdown(service).await?;
//! api.abort();
//! # Ok(())
//! # }
//! ```

use crate::config::Config;
use crate::db::{Database, NewJob};
use crate::error::{Error, Result};
use crate::options::ExportOptions;
use crate::processor::{CliRenderer, JobProcessor, ProcessorContext, Renderer};
use crate::types::{
    Capabilities, Event, ExportJob, JobId, JobStatus, ProposalId, Status, SubmitResponse,
};
use crate::utils::sanitize_filename;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Failure message recorded for jobs left `processing` by an unclean stop
const INTERRUPTED_BY_RESTART: &str = "export interrupted by service restart";

/// Finished artifact ready to be streamed to a client
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Location of the PDF inside the output directory
    pub path: PathBuf,
    /// Filename suggested to the client
    pub download_name: String,
    /// Size recorded when the job completed
    pub file_size: u64,
}

/// Export job service
pub struct ExportService {
    db: Arc<Database>,
    renderer: Arc<dyn Renderer>,
    processor: JobProcessor,
    event_tx: broadcast::Sender<Event>,
    config: Arc<Config>,
    cancel: CancellationToken,
    accepting: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ExportService {
    /// Start the service with the command-line renderer
    ///
    /// Conversion tools are taken from `processor.browser_path` and
    /// `processor.office_path`, falling back to a PATH search.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let renderer = CliRenderer::from_config(&config.processor);
        let caps = renderer.capabilities();
        if caps.methods().is_empty() {
            tracing::warn!("No conversion tool found; every export job will fail until chromium or LibreOffice is installed");
        }
        Self::with_renderer(config, Arc::new(renderer)).await
    }

    /// Start the service with a custom renderer
    ///
    /// Opens the job store, fails jobs interrupted by a previous run,
    /// re-queues jobs that never started and spawns the retention sweep.
    pub async fn with_renderer(config: Config, renderer: Arc<dyn Renderer>) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);

        let interrupted = db.fail_interrupted(INTERRUPTED_BY_RESTART).await?;
        if interrupted > 0 {
            tracing::warn!(count = interrupted, "Failed export jobs interrupted by a previous run");
        }

        tokio::fs::create_dir_all(&config.processor.output_dir).await?;

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let config = Arc::new(config);

        let (processor, processor_handle) = JobProcessor::start(ProcessorContext {
            db: db.clone(),
            renderer: renderer.clone(),
            event_tx: event_tx.clone(),
            output_dir: config.processor.output_dir.clone(),
            max_concurrent_jobs: config.processor.max_concurrent_jobs,
            cancel: cancel.child_token(),
        });

        let pending = db.list_jobs_by_status(Status::Queued).await?;
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "Re-queuing export jobs from a previous run");
        }
        for job in &pending {
            processor.enqueue(job.job_id.clone())?;
        }

        let service = Self {
            db,
            renderer,
            processor,
            event_tx,
            config,
            cancel,
            accepting: AtomicBool::new(true),
            tasks: Mutex::new(vec![processor_handle]),
        };

        let cleanup = service.spawn_cleanup_task();
        service.tasks.lock().await.push(cleanup);

        tracing::info!(
            renderer = service.renderer.name(),
            methods = ?service.renderer.capabilities().methods(),
            "Export service started"
        );
        Ok(service)
    }

    /// Accept a new export job
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown) has begun
    /// - [`Error::Validation`] if the options are out of range
    pub async fn create_job(
        &self,
        proposal_id: ProposalId,
        options: ExportOptions,
    ) -> Result<SubmitResponse> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        options.validate()?;

        let job = NewJob {
            job_id: JobId::new(),
            estimated_time_secs: options.estimated_time_secs(),
            proposal_id,
            options,
        };
        self.db.insert_job(&job).await?;

        tracing::info!(
            job_id = %job.job_id,
            proposal_id = %job.proposal_id,
            method = job.options.method.as_str(),
            "Export job queued"
        );
        self.event_tx
            .send(Event::Queued {
                job_id: job.job_id.clone(),
                proposal_id: job.proposal_id.clone(),
            })
            .ok();

        if let Err(e) = self.processor.enqueue(job.job_id.clone()) {
            self.db.mark_failed(&job.job_id, &e.to_string()).await?;
            return Err(e);
        }

        Ok(SubmitResponse {
            job_id: job.job_id,
            method: job.options.method,
            estimated_time: job.estimated_time_secs,
        })
    }

    /// Look up a job belonging to `proposal_id`
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if the job does not exist or belongs to
    /// another proposal.
    pub async fn job(&self, proposal_id: &ProposalId, job_id: &JobId) -> Result<ExportJob> {
        match self.db.get_job(job_id).await? {
            Some(job) if &job.proposal_id == proposal_id => Ok(job),
            _ => Err(Error::JobNotFound {
                job_id: job_id.clone(),
            }),
        }
    }

    /// Current status of a job
    pub async fn job_status(&self, proposal_id: &ProposalId, job_id: &JobId) -> Result<JobStatus> {
        Ok(self.job(proposal_id, job_id).await?.job_status())
    }

    /// Locate the artifact of a completed job
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the job is completed.
    pub async fn artifact(&self, proposal_id: &ProposalId, job_id: &JobId) -> Result<Artifact> {
        let job = self.job(proposal_id, job_id).await?;
        let file_name = match (&job.status, &job.file_path) {
            (Status::Completed, Some(file_name)) => file_name,
            _ => {
                return Err(Error::InvalidState {
                    job_id: job.job_id.clone(),
                    operation: "download".to_string(),
                    current_state: job.status.to_string(),
                });
            }
        };

        Ok(Artifact {
            path: self.config.processor.output_dir.join(file_name),
            download_name: format!("{}.pdf", sanitize_filename(proposal_id.as_str())),
            file_size: job.file_size.unwrap_or(0),
        })
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Methods the configured renderer can execute
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            renderer: self.renderer.name().to_string(),
            methods: self.renderer.capabilities().methods(),
        }
    }

    /// Service configuration
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Whether new jobs are still accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Token cancelled once shutdown begins
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Delete terminal jobs older than `persistence.job_retention` with their artifacts
    ///
    /// Returns the number of jobs removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        purge_expired_jobs(&self.db, &self.event_tx, &self.config).await
    }

    fn spawn_cleanup_task(&self) -> JoinHandle<()> {
        let db = self.db.clone();
        let event_tx = self.event_tx.clone();
        let config = self.config.clone();
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.persistence.cleanup_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = purge_expired_jobs(&db, &event_tx, &config).await {
                            tracing::error!(error = %e, "Retention sweep failed");
                        }
                    }
                    _ = cancel.cancelled() => {
                        tracing::debug!("Retention sweep stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Spawn the REST API server in a background task
    pub fn spawn_api_server(self: &Arc<Self>) -> JoinHandle<Result<()>> {
        let service = self.clone();
        let config = self.config.clone();

        tokio::spawn(async move { crate::api::start_api_server(service, config).await })
    }

    /// Gracefully shut down the service
    ///
    /// Stops accepting jobs, interrupts running renders (they are recorded as
    /// failed), waits for background tasks and emits [`Event::Shutdown`].
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting.store(false, Ordering::SeqCst);
        self.cancel.cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }

        self.event_tx.send(Event::Shutdown).ok();
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}

async fn purge_expired_jobs(
    db: &Database,
    event_tx: &broadcast::Sender<Event>,
    config: &Config,
) -> Result<usize> {
    let retention =
        chrono::Duration::from_std(config.persistence.job_retention).map_err(|e| Error::Config {
            message: format!("job retention out of range: {}", e),
            key: Some("persistence.job_retention".to_string()),
        })?;
    let cutoff = chrono::Utc::now() - retention;

    let purged = db.purge_terminal_before(cutoff).await?;
    for job in &purged {
        if let Some(file_name) = &job.file_path {
            let path = config.processor.output_dir.join(file_name);
            if let Err(e) = tokio::fs::remove_file(&path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(job_id = %job.job_id, path = %path.display(), error = %e, "Failed to delete expired artifact");
            }
        }
        event_tx.send(Event::Purged {
                job_id: job.job_id.clone(),
            }).ok();
    }

    if !purged.is_empty() {
        tracing::info!(count = purged.len(), "Purged expired export jobs");
    }
    Ok(purged.len())
}
