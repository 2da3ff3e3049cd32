//! Export controller: submit, poll, download

use super::{ExportClient, ExportState, FailureReason, StatusPoller};
use crate::config::{ClientConfig, RetryConfig};
use crate::error::{DownloadError, Error, Result};
use crate::options::{ExportMethod, ExportOptions};
use crate::types::{JobId, ProposalId, Status, SubmitResponse};
use crate::utils::{get_unique_path, sanitize_filename};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Notification emitted by [`ExportController`]
#[derive(Clone, Debug, PartialEq)]
pub enum ExportEvent {
    /// Job accepted by the server
    Submitted {
        /// Assigned job ID
        job_id: JobId,
        /// Proposal being exported
        proposal_id: ProposalId,
        /// Method reported by the server
        method: ExportMethod,
        /// Advisory duration in seconds
        estimated_time: u64,
    },
    /// Submission was rejected or could not be delivered
    SubmissionFailed {
        /// Proposal that was being exported
        proposal_id: ProposalId,
        /// Error message
        error: String,
    },
    /// Non-terminal status observed (sent for every observation)
    Progress {
        /// Job being polled
        job_id: JobId,
        /// Observed status
        status: Status,
        /// Progress after the monotone clamp
        progress: u8,
    },
    /// Job completed
    Completed {
        /// Finished job
        job_id: JobId,
        /// Artifact size in bytes
        file_size: u64,
    },
    /// Job failed or polling failed
    Failed {
        /// Failed job
        job_id: JobId,
        /// What went wrong
        reason: FailureReason,
    },
    /// Polling loop exited (terminal state, error, or cancellation)
    PollingStopped {
        /// Job that was being polled
        job_id: JobId,
        /// Number of status observations made
        polls: u32,
    },
    /// Artifact downloaded
    Downloaded {
        /// Finished job
        job_id: JobId,
        /// Where the artifact was saved, if it was written to disk
        path: Option<PathBuf>,
        /// Artifact size in bytes
        bytes: u64,
    },
}

struct Session {
    proposal_id: ProposalId,
    job_id: JobId,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    done: watch::Receiver<bool>,
}

/// Drives one export at a time through its lifecycle
///
/// `submit` starts a background polling task that updates [`ExportState`]
/// until the job reaches a terminal state. Dropping the controller stops
/// polling.
///
/// # Example
///
/// ```no_run
/// use proposal_export::{ClientConfig, ExportController, ExportOptions, ProposalId};
///
/// # async fn example() -> proposal_export::Result<()> {
/// let controller = ExportController::new(&ClientConfig::default())?;
/// let options = ExportOptions::builder().landscape(true).build()?;
/// controller.submit(ProposalId::new("p-42")?, options).await?;
///
/// let state = controller.wait().await;
/// if let Some(err) = state.error() {
///     return Err(err);
/// }
/// let path = controller.save_to("./downloads".as_ref(), "Q3 Proposal").await?;
/// println!("saved to {}", path.display());
/// # Ok(())
/// # }
/// ```
pub struct ExportController {
    client: ExportClient,
    poll_interval: Duration,
    poll_retry: Option<RetryConfig>,
    state: Arc<RwLock<ExportState>>,
    session: Mutex<Option<Session>>,
    event_tx: broadcast::Sender<ExportEvent>,
    cancel: CancellationToken,
}

impl ExportController {
    /// Create a controller from client configuration
    ///
    /// # Errors
    /// Returns [`Error::Config`] for a zero poll interval or an invalid base URL.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = ExportClient::new(config)?;
        Self::with_client(client, config)
    }

    /// Create a controller around an existing client
    pub fn with_client(client: ExportClient, config: &ClientConfig) -> Result<Self> {
        if config.poll_interval.is_zero() {
            return Err(Error::Config {
                message: "poll interval must be greater than zero".to_string(),
                key: Some("client.poll_interval".to_string()),
            });
        }
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            client,
            poll_interval: config.poll_interval,
            poll_retry: config.poll_retry.clone(),
            state: Arc::new(RwLock::new(ExportState::Idle)),
            session: Mutex::new(None),
            event_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to controller events
    ///
    /// Slow subscribers that fall behind receive `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<ExportEvent> {
        self.event_tx.subscribe()
    }

    /// Snapshot of the current state
    pub async fn state(&self) -> ExportState {
        self.state.read().await.clone()
    }

    /// The underlying HTTP client
    pub fn client(&self) -> &ExportClient {
        &self.client
    }

    /// Submit a new export and start polling it
    ///
    /// Any export in progress is abandoned first through [`reset`](Self::reset).
    /// On failure the state stays `Idle` and no polling starts.
    pub async fn submit(
        &self,
        proposal_id: ProposalId,
        options: ExportOptions,
    ) -> Result<SubmitResponse> {
        options.validate()?;
        self.reset().await;

        let response = match self.client.submit(&proposal_id, &options).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(proposal_id = %proposal_id, error = %e, "Export submission failed");
                self.event_tx
                    .send(ExportEvent::SubmissionFailed {
                        proposal_id,
                        error: e.to_string(),
                    })
                    .ok();
                return Err(e);
            }
        };

        let job_id = response.job_id.clone();
        tracing::info!(
            proposal_id = %proposal_id,
            job_id = %job_id,
            method = response.method.as_str(),
            estimated_time = response.estimated_time,
            "Export job submitted"
        );

        let mut session = self.session.lock().await;
        *self.state.write().await = ExportState::submitted(&response);
        self.event_tx
            .send(ExportEvent::Submitted {
                job_id: job_id.clone(),
                proposal_id: proposal_id.clone(),
                method: response.method,
                estimated_time: response.estimated_time,
            })
            .ok();

        let cancel = self.cancel.child_token();
        let poller = StatusPoller::new(
            self.client.clone(),
            proposal_id.clone(),
            job_id.clone(),
            self.poll_interval,
            cancel.clone(),
        )
        .with_retry(self.poll_retry.clone());

        let (done_tx, done_rx) = watch::channel(false);
        let handle = tokio::spawn(drive(
            poller,
            self.state.clone(),
            self.event_tx.clone(),
            cancel.clone(),
            done_tx,
        ));

        *session = Some(Session {
            proposal_id,
            job_id,
            cancel,
            handle: Some(handle),
            done: done_rx,
        });

        Ok(response)
    }

    /// Stop polling, keeping the last observed state
    ///
    /// The server-side job keeps running; there is no cancel endpoint.
    pub async fn cancel(&self) {
        let session = self.session.lock().await;
        if let Some(session) = session.as_ref() {
            // Cancel under the state lock so no in-flight observation lands afterwards
            let _state = self.state.write().await;
            session.cancel.cancel();
            tracing::debug!(job_id = %session.job_id, "Export polling cancelled");
        }
    }

    /// Stop polling and return to `Idle`
    ///
    /// Waits for the polling task to exit, so the abandoned job's
    /// [`ExportEvent::PollingStopped`] is sent before `reset` returns. After a
    /// resubmission subscribers therefore see that event ahead of the new
    /// job's [`ExportEvent::Submitted`], and no event about the old job follows.
    pub async fn reset(&self) {
        let previous = self.session.lock().await.take();
        if let Some(mut session) = previous {
            {
                let mut state = self.state.write().await;
                session.cancel.cancel();
                *state = ExportState::Idle;
            }
            if let Some(handle) = session.handle.take()
                && let Err(e) = handle.await
            {
                tracing::error!(job_id = %session.job_id, error = %e, "Export polling task panicked");
            }
        } else {
            *self.state.write().await = ExportState::Idle;
        }
    }

    /// Wait until the polling loop exits, then return the state
    ///
    /// Returns immediately when nothing is being polled.
    pub async fn wait(&self) -> ExportState {
        let done = self.session.lock().await.as_ref().map(|s| s.done.clone());
        if let Some(mut done) = done {
            // A dropped sender means the task is gone, which also counts as done
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.state().await
    }

    /// Download the artifact of the completed job
    ///
    /// # Errors
    /// Returns [`DownloadError::NotReady`] without any network call unless the
    /// state is `Completed`. Download failures leave the state unchanged.
    pub async fn download(&self) -> Result<Bytes> {
        let (proposal_id, job_id) = self.completed_job().await?;
        let bytes = self.client.download(&proposal_id, &job_id).await?;
        self.event_tx
            .send(ExportEvent::Downloaded {
                job_id,
                path: None,
                bytes: bytes.len() as u64,
            })
            .ok();
        Ok(bytes)
    }

    /// Download the artifact into `dir` as `{sanitized title}.pdf`
    ///
    /// An existing file with the same name is kept and the new file gets a
    /// ` (n)` suffix.
    pub async fn save_to(&self, dir: &Path, title: &str) -> Result<PathBuf> {
        let (proposal_id, job_id) = self.completed_job().await?;
        let bytes = self.client.download(&proposal_id, &job_id).await?;

        tokio::fs::create_dir_all(dir).await?;
        let target = dir.join(format!("{}.pdf", sanitize_filename(title)));
        let path = get_unique_path(&target)?;
        tokio::fs::write(&path, &bytes).await?;

        tracing::info!(
            job_id = %job_id,
            path = %path.display(),
            bytes = bytes.len(),
            "Export saved"
        );
        self.event_tx
            .send(ExportEvent::Downloaded {
                job_id,
                path: Some(path.clone()),
                bytes: bytes.len() as u64,
            })
            .ok();
        Ok(path)
    }

    async fn completed_job(&self) -> Result<(ProposalId, JobId)> {
        let state = self.state.read().await.clone();
        let ExportState::Completed { job_id, .. } = state else {
            return Err(DownloadError::NotReady {
                state: state.name().to_string(),
            }
            .into());
        };

        let session = self.session.lock().await;
        match session.as_ref() {
            Some(session) if session.job_id == job_id => Ok((session.proposal_id.clone(), job_id)),
            _ => Err(DownloadError::NotReady {
                state: "idle".to_string(),
            }
            .into()),
        }
    }
}

impl Drop for ExportController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn drive(
    mut poller: StatusPoller,
    state: Arc<RwLock<ExportState>>,
    event_tx: broadcast::Sender<ExportEvent>,
    cancel: CancellationToken,
    done_tx: watch::Sender<bool>,
) {
    let job_id = poller.job_id().clone();

    while let Some(result) = poller.next().await {
        let next = {
            let mut current = state.write().await;
            if cancel.is_cancelled() || current.job_id() != Some(&job_id) {
                break;
            }
            let next = match &result {
                Ok(status) => current.observe(status),
                Err(e) => current.poll_failed(e.to_string()),
            };
            *current = next.clone();
            next
        };

        match (&result, &next) {
            (_, ExportState::Completed { file_size, .. }) => {
                tracing::info!(job_id = %job_id, file_size, "Export job completed");
                event_tx
                    .send(ExportEvent::Completed {
                        job_id: job_id.clone(),
                        file_size: *file_size,
                    })
                    .ok();
            }
            (_, ExportState::Failed { reason, .. }) => {
                tracing::info!(job_id = %job_id, reason = %reason, "Export job failed");
                event_tx
                    .send(ExportEvent::Failed {
                        job_id: job_id.clone(),
                        reason: reason.clone(),
                    })
                    .ok();
            }
            (Ok(status), _) => {
                event_tx
                    .send(ExportEvent::Progress {
                        job_id: job_id.clone(),
                        status: status.status(),
                        progress: next.progress(),
                    })
                    .ok();
            }
            (Err(_), _) => {}
        }

        if next.is_terminal() {
            break;
        }
    }

    event_tx
        .send(ExportEvent::PollingStopped {
            job_id,
            polls: poller.polls(),
        })
        .ok();
    done_tx.send(true).ok();
}
