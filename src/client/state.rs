//! Client-side export state machine.
//!
//! `Idle → Queued → Processing* → (Completed | Failed)`. Terminal states absorb
//! every later observation.

use crate::error::Error;
use crate::options::{ExportMethod, RenderMethod};
use crate::types::{JobId, JobStatus, SubmitResponse};

/// Why the observed job ended in failure
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    /// The server reported `failed` with this message
    Job(String),
    /// A status poll could not be completed; the server-side job may still be running
    PollTransport(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Job(msg) => write!(f, "{msg}"),
            FailureReason::PollTransport(msg) => write!(f, "lost contact with export job: {msg}"),
        }
    }
}

/// Local view of an export job
#[derive(Clone, Debug, PartialEq, Default)]
pub enum ExportState {
    /// No job submitted
    #[default]
    Idle,
    /// Submitted, waiting for a worker
    Queued {
        /// Job to poll
        job_id: JobId,
        /// Method reported by the server so far
        method: ExportMethod,
        /// Advisory duration in seconds
        estimated_time: u64,
    },
    /// Being rendered
    Processing {
        /// Job being polled
        job_id: JobId,
        /// Highest progress observed (0-100)
        progress: u8,
        /// Concrete method, once reported
        method: Option<RenderMethod>,
    },
    /// Artifact ready for download
    Completed {
        /// Finished job
        job_id: JobId,
        /// Artifact size in bytes
        file_size: u64,
        /// Method that produced the artifact
        method: Option<RenderMethod>,
    },
    /// Job failed (or could no longer be observed)
    Failed {
        /// Failed job
        job_id: JobId,
        /// What went wrong
        reason: FailureReason,
    },
}

impl ExportState {
    /// State right after a successful submission
    pub fn submitted(response: &SubmitResponse) -> Self {
        ExportState::Queued {
            job_id: response.job_id.clone(),
            method: response.method,
            estimated_time: response.estimated_time,
        }
    }

    /// Job being tracked, if any
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            ExportState::Idle => None,
            ExportState::Queued { job_id, .. }
            | ExportState::Processing { job_id, .. }
            | ExportState::Completed { job_id, .. }
            | ExportState::Failed { job_id, .. } => Some(job_id),
        }
    }

    /// Whether the state can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportState::Completed { .. } | ExportState::Failed { .. })
    }

    /// Progress to display
    pub fn progress(&self) -> u8 {
        match self {
            ExportState::Idle | ExportState::Queued { .. } | ExportState::Failed { .. } => 0,
            ExportState::Processing { progress, .. } => *progress,
            ExportState::Completed { .. } => 100,
        }
    }

    /// Short state name
    pub fn name(&self) -> &'static str {
        match self {
            ExportState::Idle => "idle",
            ExportState::Queued { .. } => "queued",
            ExportState::Processing { .. } => "processing",
            ExportState::Completed { .. } => "completed",
            ExportState::Failed { .. } => "failed",
        }
    }

    /// Concrete method, once known
    pub fn method(&self) -> Option<RenderMethod> {
        match self {
            ExportState::Queued { method, .. } => method.concrete(),
            ExportState::Processing { method, .. } | ExportState::Completed { method, .. } => {
                *method
            }
            ExportState::Idle | ExportState::Failed { .. } => None,
        }
    }

    /// The failure as an error, if the state is `Failed`
    pub fn error(&self) -> Option<Error> {
        match self {
            ExportState::Failed {
                job_id,
                reason: FailureReason::Job(message),
            } => Some(Error::JobFailed {
                job_id: job_id.clone(),
                message: message.clone(),
            }),
            ExportState::Failed {
                job_id,
                reason: FailureReason::PollTransport(message),
            } => Some(Error::PollTransport {
                job_id: job_id.clone(),
                message: message.clone(),
            }),
            _ => None,
        }
    }

    /// Next state after the server reported `status`
    pub fn observe(&self, status: &JobStatus) -> ExportState {
        let Some(job_id) = self.job_id().cloned() else {
            return self.clone();
        };
        if self.is_terminal() {
            return self.clone();
        }

        match status {
            JobStatus::Queued { method } => match self {
                // a job never goes back to the queue; keep what we saw
                ExportState::Processing { .. } => self.clone(),
                ExportState::Queued {
                    method: previous,
                    estimated_time,
                    ..
                } => ExportState::Queued {
                    job_id,
                    method: method.map(ExportMethod::from).unwrap_or(*previous),
                    estimated_time: *estimated_time,
                },
                _ => self.clone(),
            },
            JobStatus::Processing { progress, method } => {
                let previous = self.progress();
                let progress = if *progress < previous {
                    tracing::warn!(
                        job_id = %job_id,
                        previous,
                        reported = *progress,
                        "Server reported decreasing progress, keeping previous value"
                    );
                    previous
                } else {
                    *progress
                };
                ExportState::Processing {
                    job_id,
                    progress,
                    method: method.or_else(|| self.method()),
                }
            }
            JobStatus::Completed {
                file_size, method, ..
            } => ExportState::Completed {
                job_id,
                file_size: *file_size,
                method: method.or_else(|| self.method()),
            },
            JobStatus::Failed { error } => ExportState::Failed {
                job_id,
                reason: FailureReason::Job(error.clone()),
            },
        }
    }

    /// Next state after a status poll failed to complete
    pub fn poll_failed(&self, message: impl Into<String>) -> ExportState {
        match self.job_id() {
            Some(job_id) if !self.is_terminal() => ExportState::Failed {
                job_id: job_id.clone(),
                reason: FailureReason::PollTransport(message.into()),
            },
            _ => self.clone(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn queued() -> ExportState {
        ExportState::submitted(&SubmitResponse {
            job_id: JobId::new(),
            method: ExportMethod::Auto,
            estimated_time: 8,
        })
    }

    fn processing(progress: u8) -> JobStatus {
        JobStatus::Processing {
            progress,
            method: Some(RenderMethod::Browser),
        }
    }

    #[test]
    fn idle_ignores_observations() {
        let idle = ExportState::Idle;
        assert_eq!(idle.observe(&processing(50)), ExportState::Idle);
        assert_eq!(idle.poll_failed("boom"), ExportState::Idle);
    }

    #[test]
    fn happy_path_walks_every_state_in_order() {
        let state = queued();
        let job_id = state.job_id().cloned().unwrap();
        assert_eq!(state.name(), "queued");

        let state = state.observe(&JobStatus::Queued { method: None });
        assert_eq!(state.name(), "queued");

        let state = state.observe(&processing(30));
        assert_eq!(state.progress(), 30);
        assert_eq!(state.method(), Some(RenderMethod::Browser));

        let state = state.observe(&processing(70));
        assert_eq!(state.progress(), 70);

        let state = state.observe(&JobStatus::Completed {
            file_size: 204_800,
            file_path: None,
            method: None,
        });
        assert_eq!(
            state,
            ExportState::Completed {
                job_id,
                file_size: 204_800,
                method: Some(RenderMethod::Browser),
            }
        );
    }

    #[test]
    fn terminal_states_absorb_everything() {
        let completed = queued().observe(&JobStatus::Completed {
            file_size: 1,
            file_path: None,
            method: None,
        });
        assert_eq!(completed.observe(&processing(10)), completed);
        assert_eq!(
            completed.observe(&JobStatus::Failed { error: "x".into() }),
            completed
        );
        assert_eq!(completed.poll_failed("late"), completed);

        let failed = queued().observe(&JobStatus::Failed {
            error: "renderer crashed".into(),
        });
        assert_eq!(failed.observe(&processing(99)), failed);
        assert!(matches!(failed.error(), Some(Error::JobFailed { message, .. }) if message == "renderer crashed"));
    }

    #[test]
    fn progress_never_goes_backwards() {
        let state = queued().observe(&processing(60)).observe(&processing(40));
        assert_eq!(state.progress(), 60);

        let state = state.observe(&JobStatus::Queued { method: None });
        assert_eq!(state.name(), "processing");
    }

    #[test]
    fn poll_failure_is_terminal_and_distinct_from_job_failure() {
        let state = queued().observe(&processing(10)).poll_failed("connection reset");
        assert!(state.is_terminal());
        assert!(matches!(
            state,
            ExportState::Failed {
                reason: FailureReason::PollTransport(_),
                ..
            }
        ));
        assert!(matches!(state.error(), Some(Error::PollTransport { .. })));
    }

    #[test]
    fn queued_picks_up_resolved_method() {
        let state = queued().observe(&JobStatus::Queued {
            method: Some(RenderMethod::Office),
        });
        assert_eq!(state.method(), Some(RenderMethod::Office));
    }
}
