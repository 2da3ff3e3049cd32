//! End-to-end export flow: ExportController against the real router
//!
//! The service runs on an ephemeral port with a scripted renderer, so no
//! Chromium or LibreOffice is needed.

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use proposal_export::{
    ClientConfig, Config, Error, ExportController, ExportEvent, ExportMethod, ExportOptions,
    ExportService, ExportState, FailureReason, ProgressReporter, ProposalId, RenderCapabilities,
    RenderMethod, RenderRequest, Renderer, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const PDF: &[u8] = b"%PDF-1.7\n1 0 obj << /Type /Catalog >> endobj\n%%EOF\n";

/// Renders in a few progress steps, or fails with a fixed message
struct ScriptedRenderer {
    steps: Vec<u8>,
    step_delay: Duration,
    fail_with: Option<&'static str>,
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn render(&self, request: &RenderRequest, progress: &ProgressReporter) -> Result<()> {
        for step in &self.steps {
            tokio::time::sleep(self.step_delay).await;
            progress.report(*step).await;
        }
        if let Some(message) = self.fail_with {
            return Err(Error::ExternalTool(message.to_string()));
        }
        tokio::fs::write(&request.output_path, PDF).await?;
        Ok(())
    }

    fn capabilities(&self) -> RenderCapabilities {
        RenderCapabilities {
            browser: true,
            office: false,
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct Server {
    base_url: String,
    service: Arc<ExportService>,
    handle: JoinHandle<Result<()>>,
    _dir: TempDir,
}

impl Server {
    async fn start(renderer: ScriptedRenderer, api_key: Option<&str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.persistence.database_path = dir.path().join("jobs.db");
        config.processor.output_dir = dir.path().join("exports");
        config.processor.search_path = false;
        config.api.api_key = api_key.map(str::to_string);

        let service = Arc::new(
            ExportService::with_renderer(config.clone(), Arc::new(renderer))
                .await
                .unwrap(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(proposal_export::api::serve(
            listener,
            service.clone(),
            Arc::new(config),
        ));

        Self {
            base_url,
            service,
            handle,
            _dir: dir,
        }
    }

    fn controller(&self, api_key: Option<&str>) -> ExportController {
        let config = ClientConfig {
            base_url: self.base_url.clone(),
            poll_interval: Duration::from_millis(25),
            api_key: api_key.map(str::to_string),
            ..Default::default()
        };
        ExportController::new(&config).unwrap()
    }

    async fn stop(self) {
        self.service.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

async fn wait(controller: &ExportController) -> ExportState {
    tokio::time::timeout(Duration::from_secs(10), controller.wait())
        .await
        .expect("export did not finish")
}

#[tokio::test]
async fn exports_and_saves_pdf() {
    let server = Server::start(
        ScriptedRenderer {
            steps: vec![20, 60, 90],
            step_delay: Duration::from_millis(30),
            fail_with: None,
        },
        None,
    )
    .await;
    let controller = server.controller(None);
    let mut events = controller.subscribe();

    let submitted = controller
        .submit(
            ProposalId::new("q3-acme").unwrap(),
            ExportOptions::builder()
                .method(ExportMethod::Browser)
                .build()
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(submitted.method, ExportMethod::Browser);

    match wait(&controller).await {
        ExportState::Completed {
            job_id,
            file_size,
            method,
        } => {
            assert_eq!(job_id, submitted.job_id);
            assert_eq!(file_size, PDF.len() as u64);
            assert_eq!(method, Some(RenderMethod::Browser));
        }
        other => panic!("expected completed, got {other:?}"),
    }

    // Progress seen by the client never goes backwards
    let mut last = 0;
    while let Ok(event) = events.try_recv() {
        if let ExportEvent::Progress { progress, .. } = event {
            assert!(progress >= last, "progress went from {last} to {progress}");
            last = progress;
        }
    }

    let bytes = controller.download().await.unwrap();
    assert_eq!(&bytes[..], PDF);

    let out = tempfile::tempdir().unwrap();
    let first = controller.save_to(out.path(), "Q3 Proposal").await.unwrap();
    let second = controller.save_to(out.path(), "Q3 Proposal").await.unwrap();
    assert_eq!(first.file_name().unwrap(), "Q3_Proposal.pdf");
    assert_ne!(first, second);
    assert_eq!(std::fs::read(&second).unwrap(), PDF);

    server.stop().await;
}

#[tokio::test]
async fn render_failure_reaches_client_verbatim() {
    let server = Server::start(
        ScriptedRenderer {
            steps: vec![40],
            step_delay: Duration::from_millis(20),
            fail_with: Some("chromium crashed while printing"),
        },
        None,
    )
    .await;
    let controller = server.controller(None);

    controller
        .submit(ProposalId::new("broken").unwrap(), ExportOptions::default())
        .await
        .unwrap();

    match wait(&controller).await {
        ExportState::Failed {
            reason: FailureReason::Job(message),
            ..
        } => assert!(
            message.contains("chromium crashed while printing"),
            "{message}"
        ),
        other => panic!("expected job failure, got {other:?}"),
    }
    assert!(matches!(
        controller.download().await,
        Err(Error::Download(_))
    ));

    server.stop().await;
}

#[tokio::test]
async fn unavailable_method_fails_the_job() {
    let server = Server::start(
        ScriptedRenderer {
            steps: vec![],
            step_delay: Duration::ZERO,
            fail_with: None,
        },
        None,
    )
    .await;
    let controller = server.controller(None);

    controller
        .submit(
            ProposalId::new("needs-office").unwrap(),
            ExportOptions::builder()
                .method(ExportMethod::Office)
                .build()
                .unwrap(),
        )
        .await
        .unwrap();

    let state = wait(&controller).await;
    assert!(
        matches!(state, ExportState::Failed { reason: FailureReason::Job(ref m), .. } if m.contains("office")),
        "{state:?}"
    );

    server.stop().await;
}

#[tokio::test]
async fn wrong_api_key_is_a_submission_error() {
    let server = Server::start(
        ScriptedRenderer {
            steps: vec![],
            step_delay: Duration::ZERO,
            fail_with: None,
        },
        Some("letmein"),
    )
    .await;

    let rejected = server.controller(Some("guess"));
    match rejected
        .submit(ProposalId::new("p").unwrap(), ExportOptions::default())
        .await
    {
        Err(Error::Submission { status, message }) => {
            assert_eq!(status, Some(401));
            assert_eq!(message, "Invalid API key");
        }
        other => panic!("expected submission error, got {other:?}"),
    }
    assert_eq!(rejected.state().await, ExportState::Idle);

    let accepted = server.controller(Some("letmein"));
    accepted
        .submit(ProposalId::new("p").unwrap(), ExportOptions::default())
        .await
        .unwrap();
    assert!(matches!(
        wait(&accepted).await,
        ExportState::Completed { .. }
    ));

    server.stop().await;
}
