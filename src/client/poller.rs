//! Status polling loop

use super::{ExportClient, PollError};
use crate::config::RetryConfig;
use crate::retry::with_retry;
use crate::types::{JobId, JobStatus, ProposalId};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Polls one job's status at a fixed interval until it finishes
///
/// The first request goes out one interval after the poller is created. The
/// poller yields nothing further after a terminal status, a poll error, or
/// cancellation.
pub struct StatusPoller {
    client: ExportClient,
    proposal_id: ProposalId,
    job_id: JobId,
    interval: Duration,
    retry: Option<RetryConfig>,
    cancel: CancellationToken,
    polls: u32,
    finished: bool,
}

impl StatusPoller {
    /// Create a poller for `job_id`
    pub fn new(
        client: ExportClient,
        proposal_id: ProposalId,
        job_id: JobId,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            proposal_id,
            job_id,
            interval,
            retry: None,
            cancel,
            polls: 0,
            finished: false,
        }
    }

    /// Retry transient poll failures instead of stopping on the first one
    pub fn with_retry(mut self, retry: Option<RetryConfig>) -> Self {
        self.retry = retry;
        self
    }

    /// Job being polled
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Number of status observations made so far
    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Whether the poller will yield nothing further
    pub fn is_finished(&self) -> bool {
        self.finished || self.cancel.is_cancelled()
    }

    /// Wait one interval, then fetch the job's status
    ///
    /// Returns `None` once the poller is finished or cancelled. A response that
    /// arrives after cancellation is discarded.
    pub async fn next(&mut self) -> Option<Result<JobStatus, PollError>> {
        if self.is_finished() {
            return None;
        }

        let cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => {
                self.finished = true;
                return None;
            }
            _ = tokio::time::sleep(self.interval) => {}
        }

        let client = self.client.clone();
        let proposal_id = self.proposal_id.clone();
        let job_id = self.job_id.clone();
        let retry = self.retry.clone();
        let fetch = async move {
            match retry {
                Some(config) => {
                    with_retry(&config, || client.fetch_status(&proposal_id, &job_id)).await
                }
                None => client.fetch_status(&proposal_id, &job_id).await,
            }
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                self.finished = true;
                return None;
            }
            result = fetch => result,
        };
        if cancel.is_cancelled() {
            self.finished = true;
            return None;
        }

        self.polls += 1;
        match &result {
            Ok(status) => {
                tracing::debug!(
                    job_id = %self.job_id,
                    poll = self.polls,
                    status = %status.status(),
                    "Polled export status"
                );
                if status.is_terminal() {
                    self.finished = true;
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "Export status poll failed");
                self.finished = true;
            }
        }
        Some(result)
    }
}
