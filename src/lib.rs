//! # proposal-export
//!
//! Asynchronous PDF export jobs for proposal documents.
//!
//! The crate has two halves that speak the same HTTP contract:
//! - **Client**: [`ExportController`] validates options, submits an export
//!   job, polls its status on a cancellable task and downloads the finished
//!   PDF. Its [`ExportState`] is an explicit state machine with absorbing
//!   terminal states and monotone progress.
//! - **Service**: [`ExportService`] persists jobs in SQLite, renders them with
//!   headless Chromium or LibreOffice under a concurrency limit, and serves
//!   the REST API (see [`api`]).
//!
//! ## Quick Start
//!
//! ```no_run
//! use proposal_export::{ClientConfig, ExportController, ExportOptions, ProposalId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = ExportController::new(&ClientConfig::default())?;
//!
//!     // Subscribe to events
//!     let mut events = controller.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     controller
//!         .submit(ProposalId::new("q3-proposal")?, ExportOptions::default())
//!         .await?;
//!     let state = controller.wait().await;
//!     if state.is_terminal() && state.error().is_none() {
//!         let path = controller.save_to("./exports".as_ref(), "Q3 Proposal").await?;
//!         println!("Saved {}", path.display());
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Export client: HTTP calls, state machine, poller, controller
pub mod client;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Export options and validation
pub mod options;
/// Job processor and renderers
pub mod processor;
/// Retry logic with exponential backoff
pub mod retry;
/// Export job service
pub mod service;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use client::{
    ExportClient, ExportController, ExportEvent, ExportState, FailureReason, PollError,
    StatusPoller,
};
pub use config::{ApiConfig, ClientConfig, Config, ProcessorConfig, RetryConfig};
pub use db::Database;
pub use error::{ApiError, DatabaseError, DownloadError, Error, Result, ToHttpStatus, ValidationError};
pub use options::{ExportMethod, ExportOptions, Margins, Quality, RenderMethod};
pub use processor::{CliRenderer, ProgressReporter, RenderCapabilities, RenderRequest, Renderer};
pub use service::{Artifact, ExportService};
pub use types::{
    Capabilities, Event, ExportJob, JobId, JobStatus, ProposalId, Status, StatusResponse,
    SubmitResponse,
};

/// Helper function to run the service with graceful signal handling.
///
/// Waits for a termination signal and then calls the service's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use proposal_export::{Config, ExportService, run_with_shutdown};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = Arc::new(ExportService::new(Config::default()).await?);
///     let api = service.spawn_api_server();
///
///     // Run with automatic signal handling
///     run_with_shutdown(service).await?;
///     api.await??;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(service: std::sync::Arc<ExportService>) -> Result<()> {
    wait_for_signal().await;
    service.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
